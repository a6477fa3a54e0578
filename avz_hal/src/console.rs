//! Diagnostic console abstraction

/// A byte-oriented diagnostic console.
///
/// The single primitive is a blocking byte write; the hypervisor's
/// diagnostics never depend on anything richer.
pub trait ConsoleDevice {
    /// Writes one byte, blocking until the device accepts it.
    fn put_byte(&mut self, byte: u8);

    /// Writes every byte of a string.
    fn put_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.put_byte(byte);
        }
    }
}
