//! Digest: FNV string hash used for bucket placement.
//!
//! The width follows the target pointer size so the result is a plain
//! `usize` on every platform. The value is never persisted; it only selects
//! a chain via `digest % buckets`.

const FNV32_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;
const FNV64_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 32-bit FNV over `bytes`.
pub const fn digest32(bytes: &[u8]) -> u32 {
    let mut hash = FNV32_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash = (hash ^ bytes[i] as u32).wrapping_mul(FNV32_PRIME);
        i += 1;
    }
    hash
}

/// 64-bit FNV over `bytes`.
pub const fn digest64(bytes: &[u8]) -> u64 {
    let mut hash = FNV64_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash = (hash ^ bytes[i] as u64).wrapping_mul(FNV64_PRIME);
        i += 1;
    }
    hash
}

/// Native-width digest of a key.
#[inline]
pub fn digest(key: &str) -> usize {
    #[cfg(target_pointer_width = "64")]
    {
        digest64(key.as_bytes()) as usize
    }
    #[cfg(not(target_pointer_width = "64"))]
    {
        digest32(key.as_bytes()) as usize
    }
}
