//! Cooperative interruption of long-running per-tile work

use tiledseg_core::Result;

/// Polled by the segmentation loops between units of work.
///
/// An implementation returns `Err(Error::Interrupted(..))` once the work
/// should stop (cancellation or a deadline); the caller propagates it.
pub trait Interrupt: Sync {
    fn check(&self) -> Result<()>;
}

/// Never interrupts
#[derive(Debug, Clone, Copy, Default)]
pub struct Uninterrupted;

impl Interrupt for Uninterrupted {
    fn check(&self) -> Result<()> {
        Ok(())
    }
}
