//! The few command words the engine emits on its own.
//!
//! Everything else in the stream is opaque to the engine.

/// Does nothing. Used to pad DMA blocks.
pub const NOP: u32 = 0x4000_0000;
/// Stall the command processor until the selected engines are idle.
pub const WAIT: u32 = 0xC000_0000;
pub const WAIT_3D: u32 = 0x0001_0000;
pub const WAIT_2D: u32 = 0x0002_0000;
/// Write the low 16 bits back to the event status word once reached.
pub const UPDATE_EVENT_TAG: u32 = 0x9800_0000;
pub const SET_REGISTERS: u32 = 0x9600_0000;
/// Fetch the given number of word pairs from the DMA buffer address.
pub const DMA: u32 = 0xA800_0000;

/// Register holding the DMA command buffer address.
pub const DMA_BUFFER_ADDR: u32 = 0x51;

const OPCODE_MASK: u32 = 0xFF00_0000;

/// Words in a DMA kick sequence.
pub const DMA_KICK_WORDS: usize = 3;

pub const fn set_registers(first: u32, count: u32) -> u32 {
    SET_REGISTERS | (count << 16) | first
}

/// DMA fetch of `words` words. `words` must be even and non-zero.
pub const fn dma(words: u32) -> u32 {
    DMA | ((words >> 1) - 1)
}

pub const fn event_tag(tag: u16) -> u32 {
    UPDATE_EVENT_TAG | tag as u32
}

/// The wait word for the requested engines, if any.
pub const fn wait_for(wait_2d: bool, wait_3d: bool) -> Option<u32> {
    if !wait_2d && !wait_3d {
        return None;
    }
    let mut word = WAIT;
    if wait_2d {
        word |= WAIT_2D;
    }
    if wait_3d {
        word |= WAIT_3D;
    }
    Some(word)
}

/// Point the DMA engine at `address` and fetch `words` words.
pub const fn dma_kick(address: u32, words: u32) -> [u32; DMA_KICK_WORDS] {
    [set_registers(DMA_BUFFER_ADDR, 1), address, dma(words)]
}

/// The tag carried by an event-tag word.
pub const fn decode_event_tag(word: u32) -> Option<u16> {
    if word & OPCODE_MASK == UPDATE_EVENT_TAG {
        Some(word as u16)
    } else {
        None
    }
}
