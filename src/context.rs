use crate::error::ContextOverflow;

/// Book-keeping of how many slots of the engine's context window are in use.
#[derive(Debug, Clone)]
pub struct ContextAccountant {
    consumed: u32,
    window: u32,
    max_trained: u32,
}

impl ContextAccountant {
    pub fn new(window: u32, max_trained: u32) -> Self {
        Self {
            consumed: 0,
            window,
            max_trained,
        }
    }

    pub fn consumed(&self) -> u32 {
        self.consumed
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn max_trained(&self) -> u32 {
        self.max_trained
    }

    pub fn remaining_capacity(&self) -> u32 {
        self.window - self.consumed
    }

    /// Record `n` tokens the engine has already accepted.
    ///
    /// The count never exceeds the window: an engine that accepts more than
    /// it was configured for is treated the same as one that refused.
    pub fn advance(&mut self, n: u32) -> Result<(), ContextOverflow> {
        match self.consumed.checked_add(n) {
            Some(next) if next <= self.window => {
                self.consumed = next;
                Ok(())
            }
            _ => Err(self.overflow()),
        }
    }

    pub fn overflow(&self) -> ContextOverflow {
        ContextOverflow {
            consumed: self.consumed,
            max_trained: self.max_trained,
        }
    }
}
