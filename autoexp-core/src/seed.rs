//! Deterministic seed derivation for replays.
//! Each derived seed is an FNV-1a hash of a domain tag, the base seed and a counter.

fn fnv1a64(bytes: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0100_0000_01b3;
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash = (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Purpose a derived seed is used for; keeps streams from different replays apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedDomain {
    Baseline,
    Intervened,
    Generator,
}

impl SeedDomain {
    const fn tag(self) -> &'static [u8; 4] {
        match self {
            Self::Baseline => b"BASE",
            Self::Intervened => b"INTV",
            Self::Generator => b"GENR",
        }
    }
}

/// Derive the seed for repetition `counter` of a replay family.
#[must_use]
pub fn derive_seed(base: u64, domain: SeedDomain, counter: u64) -> u64 {
    let mut buf = [0u8; 24];
    buf[..4].copy_from_slice(b"AXP-");
    buf[4..8].copy_from_slice(domain.tag());
    buf[8..16].copy_from_slice(&base.to_le_bytes());
    buf[16..24].copy_from_slice(&counter.to_le_bytes());
    fnv1a64(&buf)
}
