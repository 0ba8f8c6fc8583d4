use log::debug;

use crate::types::{PowerState, RenderCommand};

/// One scheduled idle expiry. A firing is only honoured while its generation is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleArm {
    pub generation: u64,
    pub deadline_ms: u64,
    pub delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct DisplayPower {
    state: PowerState,
    deadline_ms: u64,
    timeout_ms: u64,
    generation: u64,
}

impl DisplayPower {
    pub fn new(timeout_ms: u64, now_ms: u64) -> Self {
        Self {
            state: PowerState::Awake,
            deadline_ms: now_ms.saturating_add(timeout_ms),
            timeout_ms,
            generation: 0,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn deadline_ms(&self) -> u64 {
        self.deadline_ms
    }

    /// The arm matching the current deadline.
    pub fn current_arm(&self, now_ms: u64) -> IdleArm {
        IdleArm {
            generation: self.generation,
            deadline_ms: self.deadline_ms,
            delay_ms: self.deadline_ms.saturating_sub(now_ms),
        }
    }

    /// Any touch, press, click or command dispatch. Wakes a dimmed display and always
    /// pushes the deadline out by the full timeout.
    pub fn reset_activity(&mut self, now_ms: u64) -> (Vec<RenderCommand>, IdleArm) {
        let mut commands = Vec::new();
        if self.state == PowerState::Dimmed {
            self.state = PowerState::Awake;
            commands.push(RenderCommand::SetBacklight(true));
            commands.push(RenderCommand::RequestRedraw);
            debug!("display woke on activity");
        }

        self.deadline_ms = now_ms.saturating_add(self.timeout_ms);
        self.generation = self.generation.wrapping_add(1);

        (commands, self.current_arm(now_ms))
    }

    pub fn tick(&mut self, now_ms: u64) -> Vec<RenderCommand> {
        if self.state == PowerState::Awake && now_ms >= self.deadline_ms {
            self.state = PowerState::Dimmed;
            debug!("display idle for {}ms, dimming", self.timeout_ms);
            return vec![RenderCommand::SetBacklight(false)];
        }
        Vec::new()
    }

    pub fn timer_fired(&mut self, arm: IdleArm, now_ms: u64) -> Vec<RenderCommand> {
        if arm.generation != self.generation {
            debug!(
                "ignoring stale idle timer (generation {} != {})",
                arm.generation, self.generation
            );
            return Vec::new();
        }
        self.tick(now_ms)
    }
}
