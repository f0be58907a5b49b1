// ABOUTME: Load-shape functions mapping elapsed time to target concurrency
// ABOUTME: Six built-in shapes, all clamped to a floor of one in-flight request
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::fmt;

use serde::{Deserialize, Serialize};

/// A load shape: `(t, duration, peak) -> target concurrency`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadShape {
    /// Always `peak`
    Constant,
    /// Linear climb from 0 to `peak` across the run
    LinearRamp,
    /// Exponential climb, slow start then steep finish
    Exponential,
    /// Five equal steps from `peak / 5` to `peak`
    Step,
    /// Low baseline with full `peak` during the central fifth of the run
    Spike,
    /// Four linear 0-to-peak cycles
    Sawtooth,
}

/// Every built-in shape, in display order
pub const ALL_SHAPES: &[LoadShape] = &[
    LoadShape::Constant,
    LoadShape::LinearRamp,
    LoadShape::Exponential,
    LoadShape::Step,
    LoadShape::Spike,
    LoadShape::Sawtooth,
];

impl LoadShape {
    /// Parse a shape from its kebab-case name
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "constant" => Some(Self::Constant),
            "linear-ramp" => Some(Self::LinearRamp),
            "exponential" => Some(Self::Exponential),
            "step" => Some(Self::Step),
            "spike" => Some(Self::Spike),
            "sawtooth" => Some(Self::Sawtooth),
            _ => None,
        }
    }

    /// Canonical name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::LinearRamp => "linear-ramp",
            Self::Exponential => "exponential",
            Self::Step => "step",
            Self::Spike => "spike",
            Self::Sawtooth => "sawtooth",
        }
    }

    /// One-line description for the `shapes` listing
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Constant => "hold peak concurrency for the whole run",
            Self::LinearRamp => "ramp linearly from 0 to peak",
            Self::Exponential => "ramp exponentially, steepest at the end",
            Self::Step => "climb in five equal steps",
            Self::Spike => "10% baseline with a full-peak burst mid-run",
            Self::Sawtooth => "four linear 0-to-peak cycles",
        }
    }

    /// Target concurrency at `t` seconds into a `duration`-second run
    ///
    /// Always at least 1, for any `t` in `[0, duration]` and any `peak >= 1`.
    #[must_use]
    pub fn target(&self, t: f64, duration: f64, peak: u32) -> u32 {
        let peak_f = f64::from(peak.max(1));
        let duration = duration.max(f64::EPSILON);
        let raw = match self {
            Self::Constant => peak_f,
            Self::LinearRamp => (t / duration * peak_f).ceil(),
            Self::Exponential => {
                let num = (3.0 * t / duration).exp() - 1.0;
                let den = 3.0_f64.exp() - 1.0;
                (num / den * peak_f).ceil()
            }
            Self::Step => {
                let step = ((t / duration * 5.0).floor() as u32).min(4);
                (peak_f * f64::from(step + 1) / 5.0).ceil()
            }
            Self::Spike => {
                let frac = t / duration;
                if (0.4..0.6).contains(&frac) {
                    peak_f
                } else {
                    (peak_f * 0.1).ceil()
                }
            }
            Self::Sawtooth => {
                let cycle = duration / 4.0;
                let pos = (t % cycle) / cycle;
                (pos * peak_f).ceil()
            }
        };
        let clamped = raw.max(1.0).min(peak_f);
        clamped as u32
    }
}

impl fmt::Display for LoadShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
