//! Terminal types and RFC 4254 terminal mode encoding
//!
//! A PTY request carries a terminal type name and an encoded terminal-modes
//! byte sequence: repeated `(opcode, u32 big-endian value)` pairs terminated
//! by a single `TTY_OP_END` byte. The empty encoding (`[0x00]`) is valid and
//! tells the server to use its own default modes.

/// Terminal type advertised in a PTY request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TerminalType {
    /// Standard xterm terminal emulator.
    #[default]
    Xterm,
    /// xterm with color support.
    XtermColor,
    /// xterm with 256 color support.
    Xterm256Color,
    /// DEC VT100 terminal.
    Vt100,
    /// DEC VT220 terminal.
    Vt220,
    /// Linux console terminal.
    Linux,
    /// GNU Screen terminal multiplexer.
    Screen,
}

impl TerminalType {
    /// The terminal name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalType::Xterm => "xterm",
            TerminalType::XtermColor => "xterm-color",
            TerminalType::Xterm256Color => "xterm-256color",
            TerminalType::Vt100 => "vt100",
            TerminalType::Vt220 => "vt220",
            TerminalType::Linux => "linux",
            TerminalType::Screen => "screen",
        }
    }
}

/// Terminal mode opcodes as defined in RFC 4254, Section 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
#[repr(u8)]
pub enum TerminalMode {
    /// End of terminal modes. Must be last in the encoded stream.
    TtyOpEnd = 0,

    // Character codes
    Vintr = 1,
    Vquit = 2,
    Verase = 3,
    Vkill = 4,
    Veof = 5,
    Veol = 6,
    Veol2 = 7,
    Vstart = 8,
    Vstop = 9,
    Vsusp = 10,
    Vdsusp = 11,
    Vreprint = 12,
    Vwerase = 13,
    Vlnext = 14,
    Vflush = 15,
    Vswtch = 16,
    Vstatus = 17,
    Vdiscard = 18,

    // Input flags
    Ignpar = 30,
    Parmrk = 31,
    Inpck = 32,
    Istrip = 33,
    Inlcr = 34,
    Igncr = 35,
    Icrnl = 36,
    Iuclc = 37,
    Ixon = 38,
    Ixany = 39,
    Ixoff = 40,
    Imaxbel = 41,

    // Local flags
    Isig = 50,
    Icanon = 51,
    Xcase = 52,
    Echo = 53,
    Echoe = 54,
    Echok = 55,
    Echonl = 56,
    Noflsh = 57,
    Tostop = 58,
    Iexten = 59,
    Echoctl = 60,
    Echoke = 61,
    Pendin = 62,

    // Output flags
    Opost = 70,
    Olcuc = 71,
    Onlcr = 72,
    Ocrnl = 73,
    Onocr = 74,
    Onlret = 75,

    // Control flags
    Cs7 = 90,
    Cs8 = 91,
    Parenb = 92,
    Parodd = 93,

    /// Input baud rate.
    TtyOpIspeed = 128,
    /// Output baud rate.
    TtyOpOspeed = 129,
}

/// An immutable, fully-encoded terminal-modes byte sequence.
///
/// Produced by [`TerminalModesBuilder::build`]; has no identity beyond its
/// bytes. The default value is the empty encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalModes(Vec<u8>);

impl TerminalModes {
    /// Returns the encoded bytes, terminator included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for TerminalModes {
    /// The empty encoding: a lone `TTY_OP_END`, meaning "use remote
    /// default modes".
    fn default() -> Self {
        TerminalModes(vec![TerminalMode::TtyOpEnd as u8])
    }
}

/// Builder for a terminal-modes byte sequence.
///
/// ```
/// use skiff::{TerminalMode, TerminalModesBuilder};
///
/// let modes = TerminalModesBuilder::new()
///     .flag(TerminalMode::Echo, false)
///     .character(TerminalMode::Vintr, 3)
///     .speed(38400)
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct TerminalModesBuilder {
    buffer: Vec<u8>,
}

impl TerminalModesBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a boolean flag mode (enabled = 1, disabled = 0).
    pub fn flag(self, mode: TerminalMode, enabled: bool) -> Self {
        self.value(mode, u32::from(enabled))
    }

    /// Sets a control character mode, e.g. `Vintr` to 3 for Ctrl-C.
    pub fn character(self, mode: TerminalMode, value: u8) -> Self {
        self.value(mode, u32::from(value))
    }

    /// Sets a mode to an arbitrary 32-bit value.
    pub fn value(mut self, mode: TerminalMode, value: u32) -> Self {
        self.buffer.push(mode as u8);
        self.buffer.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Sets both input and output baud rates in one call.
    pub fn speed(self, baud: u32) -> Self {
        self.value(TerminalMode::TtyOpIspeed, baud)
            .value(TerminalMode::TtyOpOspeed, baud)
    }

    /// Appends the `TTY_OP_END` terminator and returns the encoded modes.
    pub fn build(mut self) -> TerminalModes {
        self.buffer.push(TerminalMode::TtyOpEnd as u8);
        TerminalModes(self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_modes_are_single_terminator() {
        assert_eq!(TerminalModes::default().as_bytes(), &[0]);
        assert_eq!(TerminalModesBuilder::new().build().as_bytes(), &[0]);
    }

    #[test]
    fn test_single_flag_encoding() {
        let modes = TerminalModesBuilder::new()
            .flag(TerminalMode::Echo, true)
            .build();
        assert_eq!(modes.as_bytes(), &[53, 0, 0, 0, 1, 0]);
    }

    #[test]
    fn test_character_encoding() {
        let modes = TerminalModesBuilder::new()
            .character(TerminalMode::Vintr, 3)
            .build();
        assert_eq!(modes.as_bytes(), &[1, 0, 0, 0, 3, 0]);
    }

    #[test]
    fn test_value_is_big_endian() {
        let modes = TerminalModesBuilder::new()
            .value(TerminalMode::TtyOpOspeed, 0x0102_0304)
            .build();
        assert_eq!(modes.as_bytes(), &[129, 1, 2, 3, 4, 0]);
    }

    #[test]
    fn test_speed_sets_both_directions() {
        let modes = TerminalModesBuilder::new().speed(38400).build();
        let expected_rate = 38400u32.to_be_bytes();
        let mut expected = vec![128];
        expected.extend_from_slice(&expected_rate);
        expected.push(129);
        expected.extend_from_slice(&expected_rate);
        expected.push(0);
        assert_eq!(modes.as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_terminal_type_wire_names() {
        assert_eq!(TerminalType::default().as_str(), "xterm");
        assert_eq!(TerminalType::Xterm256Color.as_str(), "xterm-256color");
        assert_eq!(TerminalType::Vt100.as_str(), "vt100");
    }

    proptest! {
        // Every encoding is 5 bytes per mode plus the terminator, and the
        // last byte is always TTY_OP_END.
        #[test]
        fn prop_encoding_length_and_terminator(flags in prop::collection::vec(any::<bool>(), 0..16)) {
            let mut builder = TerminalModesBuilder::new();
            for (i, enabled) in flags.iter().enumerate() {
                let mode = if i % 2 == 0 { TerminalMode::Echo } else { TerminalMode::Icanon };
                builder = builder.flag(mode, *enabled);
            }
            let encoded = builder.build();
            prop_assert_eq!(encoded.as_bytes().len(), flags.len() * 5 + 1);
            prop_assert_eq!(*encoded.as_bytes().last().unwrap(), 0u8);
        }
    }
}
