//! A small emulation of the plotter firmware.
//!
//! [`SimulatedPlotter`] sits on the far end of a [`MockController`] and
//! answers the way the real controller does: `ok` for every command, the
//! current position for the position query. Linear moves (`G0`/`G1`) update
//! the tracked position; `G28` homes to the origin.
//!
//! It can optionally ask for a resend of every n-th command, which is useful
//! for exercising the retransmit path without hardware.

use whiteboard_core::types::Position;

use crate::mock_transport::MockController;

/// Command that asks the simulated firmware for its position.
const POSITION_QUERY: &str = "M118";

pub struct SimulatedPlotter {
    controller: MockController,
    position: Position,
    resend_every: Option<usize>,
    received: usize,
}

impl SimulatedPlotter {
    /// Start at the origin.
    pub fn new(controller: MockController) -> Self {
        Self {
            controller,
            position: Position::new(0.0, 0.0, 0.0),
            resend_every: None,
            received: 0,
        }
    }

    /// Start with an unknown position, as the firmware reports before homing.
    pub fn unhomed(controller: MockController) -> Self {
        Self {
            position: Position::new(f64::NAN, f64::NAN, f64::NAN),
            ..Self::new(controller)
        }
    }

    /// Answer `rs` to every `n`-th command received (counting from one).
    pub fn with_resend_every(mut self, n: usize) -> Self {
        self.resend_every = (n > 0).then_some(n);
        self
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Answer commands until the transport is dropped.
    pub async fn run(mut self) {
        while let Some(command) = self.controller.next_command().await {
            for line in self.handle(&command) {
                self.controller.reply(line);
            }
        }
        tracing::debug!("simulated plotter stopped");
    }

    /// Process one command and return the reply lines.
    pub fn handle(&mut self, command: &str) -> Vec<String> {
        self.received += 1;
        if let Some(n) = self.resend_every {
            if self.received % n == 0 {
                return vec!["rs".to_string()];
            }
        }

        let mut words = command.split_whitespace();
        let Some(code) = words.next() else {
            return vec!["// empty command".to_string(), "ok".to_string()];
        };

        match code {
            "G0" | "G1" => {
                for word in words {
                    self.apply_axis(word);
                }
                vec!["ok".to_string()]
            }
            "G28" => {
                self.position = Position::new(0.0, 0.0, 0.0);
                vec!["// homed".to_string(), "ok".to_string()]
            }
            POSITION_QUERY => vec![format!(
                "ok X:{:.3} Y:{:.3} Z:{:.3}",
                self.position.x, self.position.y, self.position.z
            )
            .replace("NaN", "nan")],
            _ => vec!["ok".to_string()],
        }
    }

    fn apply_axis(&mut self, word: &str) {
        let Some(axis) = word.chars().next() else {
            return;
        };
        let Ok(value) = word[axis.len_utf8()..].parse::<f64>() else {
            return;
        };
        match axis {
            'X' => self.position.x = value,
            'Y' => self.position.y = value,
            'Z' => self.position.z = value,
            _ => {}
        }
    }
}
