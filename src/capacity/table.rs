// Static symbol capacity table

use crate::common::types::{ErrorLevel, MAX_VERSION, MIN_VERSION};

/// Data bits per symbol, indexed `[version - 1][level]` in L, M, Q, H order.
const DATA_BITS: [[u32; 4]; 40] = [
    [152, 128, 104, 72],
    [272, 224, 176, 128],
    [440, 352, 272, 208],
    [640, 512, 384, 288],
    [864, 688, 496, 368],
    [1088, 864, 608, 480],
    [1248, 992, 704, 528],
    [1552, 1232, 880, 688],
    [1856, 1456, 1056, 800],
    [2192, 1728, 1232, 976],
    [2592, 2032, 1440, 1048],
    [2960, 2320, 1648, 1184],
    [3424, 2672, 1952, 1376],
    [3688, 2920, 2088, 1504],
    [4184, 3320, 2360, 1784],
    [4712, 3624, 2600, 2024],
    [5176, 4056, 2936, 2264],
    [5768, 4504, 3176, 2504],
    [6360, 5016, 3560, 2728],
    [6888, 5352, 3880, 3080],
    [7456, 5712, 4096, 3248],
    [8048, 6256, 4544, 3536],
    [8752, 6880, 4912, 3712],
    [9392, 7312, 5312, 4112],
    [10208, 8000, 5744, 4304],
    [10960, 8496, 6032, 4768],
    [11744, 9024, 6464, 5024],
    [12248, 9544, 6968, 5288],
    [13048, 10136, 7288, 5608],
    [13880, 10984, 7880, 5960],
    [14744, 11640, 8264, 6344],
    [15640, 12328, 8920, 6760],
    [16568, 13048, 9368, 7208],
    [17528, 13800, 9848, 7688],
    [18448, 14496, 10288, 7888],
    [19472, 15312, 10832, 8432],
    [20528, 15936, 11408, 8768],
    [21616, 16816, 12016, 9136],
    [22496, 17728, 12656, 9776],
    [23648, 18672, 13328, 10208],
];

/// Byte-mode payload bytes: mode indicator (4 bits) and the character count
/// field (8 bits below version 10, 16 bits above) come out of the data bits.
const fn byte_capacity(version: usize, bits: u32) -> usize {
    let count_bits = if version <= 9 { 8 } else { 16 };
    ((bits - 4 - count_bits) / 8) as usize
}

const fn build_table() -> [[usize; 4]; 40] {
    let mut table = [[0usize; 4]; 40];
    let mut v = 0;
    while v < 40 {
        let mut l = 0;
        while l < 4 {
            table[v][l] = byte_capacity(v + 1, DATA_BITS[v][l]);
            l += 1;
        }
        v += 1;
    }
    table
}

static BYTE_CAPACITY: [[usize; 4]; 40] = build_table();

/// Usable payload bytes for one symbol; 0 for a version outside 1..=40
pub fn capacity(version: u8, level: ErrorLevel) -> usize {
    if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
        return 0;
    }
    BYTE_CAPACITY[(version - 1) as usize][level.ordinal()]
}

/// Module count along one side of a symbol
pub fn modules(version: u8) -> u32 {
    21 + 4 * (version.max(1) as u32 - 1)
}

/// Largest whole-module rendering of `version` that fits `max_pixels`
pub fn symbol_pixel_size(version: u8, max_pixels: u32) -> u32 {
    let m = modules(version);
    (max_pixels / m) * m
}
