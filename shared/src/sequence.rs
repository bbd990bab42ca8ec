use crate::MESSAGE_NUMBER_MODULUS;

/// Wrapping message number generator for one direction of a connection.
///
/// Not synchronised; the owner serialises access.
#[derive(Debug, Clone)]
pub struct MessageSequence {
    next: u32,
    modulus: u32,
}

impl MessageSequence {
    /// Sequence matching the 16-bit wire field.
    pub fn new() -> Self {
        Self::with_modulus(MESSAGE_NUMBER_MODULUS)
    }

    pub fn with_modulus(modulus: u32) -> Self {
        Self {
            next: 0,
            modulus: modulus.max(1),
        }
    }

    /// Returns the current number and advances, wrapping to zero at the modulus.
    pub fn next(&mut self) -> u32 {
        let current = self.next;
        self.next = (self.next + 1) % self.modulus;
        current
    }

    /// The number the next call to [`MessageSequence::next`] will return.
    pub fn peek(&self) -> u32 {
        self.next
    }

    pub fn modulus(&self) -> u32 {
        self.modulus
    }
}

impl Default for MessageSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a 16-bit wire number comes after `last`, allowing for wrap-around.
///
/// Numbers less than half the number space ahead of `last` are newer; a
/// repeat of `last` or anything behind it is not. Receivers use this to drop
/// retransmitted messages they already processed.
pub fn is_newer(number: u16, last: u16) -> bool {
    let ahead = number.wrapping_sub(last);
    ahead != 0 && ahead < 0x8000
}
