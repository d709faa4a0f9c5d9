// Flixor - Offline Media for Plex Libraries
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Progress throttling and speed tracking
//!
//! Raw transfer callbacks arrive per chunk, far too often for the UI. The
//! throttle forwards a callback only when at least 500ms elapsed since the
//! last forward OR the percentage moved by at least 2 points — bounding UI
//! churn without starving slow transfers of updates. Throttling lives here,
//! in the emitting component, not in listeners.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Minimum interval between forwarded progress callbacks
const FORWARD_INTERVAL: Duration = Duration::from_millis(500);

/// Percentage-point movement that forces a forward regardless of elapsed time
const FORWARD_PERCENT_STEP: f64 = 2.0;

/// Window for the sliding speed average
const SPEED_WINDOW: Duration = Duration::from_secs(10);

/// Gate deciding which raw progress callbacks reach listeners
#[derive(Debug)]
pub struct ProgressThrottle {
    min_interval: Duration,
    min_percent_step: f64,
    last_forward: Option<(Instant, f64)>,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self::with_limits(FORWARD_INTERVAL, FORWARD_PERCENT_STEP)
    }

    pub fn with_limits(min_interval: Duration, min_percent_step: f64) -> Self {
        Self {
            min_interval,
            min_percent_step,
            last_forward: None,
        }
    }

    /// Whether a callback at this percentage should be forwarded.
    /// The first callback is always forwarded.
    pub fn should_forward(&mut self, percent: f64) -> bool {
        let now = Instant::now();

        let forward = match self.last_forward {
            None => true,
            Some((at, last_percent)) => {
                now.duration_since(at) >= self.min_interval
                    || (percent - last_percent).abs() >= self.min_percent_step
            }
        };

        if forward {
            self.last_forward = Some((now, percent));
        }
        forward
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new()
    }
}

/// Sliding-window download speed tracker
#[derive(Debug)]
pub struct SpeedTracker {
    samples: VecDeque<SpeedSample>,
    window: Duration,
}

#[derive(Debug, Clone, Copy)]
struct SpeedSample {
    timestamp: Instant,
    position: u64,
}

impl SpeedTracker {
    pub fn new() -> Self {
        Self::with_window(SPEED_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Record the total bytes downloaded so far
    pub fn add_position(&mut self, position: u64) {
        let now = Instant::now();
        self.samples.push_back(SpeedSample {
            timestamp: now,
            position,
        });

        while let Some(sample) = self.samples.front() {
            if now.duration_since(sample.timestamp) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Average speed over the window in bytes per second
    pub fn average_speed(&self) -> f64 {
        let (first, last) = match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) if self.samples.len() >= 2 => (first, last),
            _ => return 0.0,
        };

        let bytes = last.position.saturating_sub(first.position);
        let seconds = last.timestamp.duration_since(first.timestamp).as_secs_f64();
        if seconds > 0.0 {
            bytes as f64 / seconds
        } else {
            0.0
        }
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}
