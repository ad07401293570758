use bitflags::bitflags;

bitflags! {
    /// High-nibble flags of a fragment's screen-info byte.
    ///
    /// The low nibble is the screen id and is not a flag; use
    /// [`FragmentFlags::from_screen_info`] to split the byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FragmentFlags: u8 {
        /// Last fragment of the frame.
        const END_OF_FRAME = 0x10;
    }
}

impl FragmentFlags {
    pub fn from_screen_info(info: u8) -> Self {
        Self::from_bits_retain(info & 0xF0)
    }
}
