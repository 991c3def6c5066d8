//! Operator I/O capability used by interactive calibration steps.

use crate::Result;
use async_trait::async_trait;

/// Key that starts sampling at the first confirmation.
pub const BEGIN_KEY: char = ' ';

/// Key that discards an attempt and samples again at review.
pub const REPEAT_KEY: char = ' ';

/// The person at the bench: reads single key presses and shows text.
#[async_trait]
pub trait Operator: Send {
    /// Blocks until one key is pressed.
    async fn read_key(&mut self) -> Result<char>;

    /// Shows a line of text.
    fn display(&mut self, text: &str);

    /// Reports an intermediate raw reading while sampling.
    fn progress(&mut self, raw_value: f64) {
        self.display(&format!("{:.3}", raw_value));
    }
}
