use easy_bitfield::{BitField, BitFieldTrait, FromBitfield, ToBitfield};
use num_traits::{FromPrimitive, ToPrimitive};

use crate::sync::pool::MonitorId;
use crate::threads::ThreadId;

/// Raw state tag stored in the low bits of the lock word.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum LockState {
    Unlocked = 0,
    Hashed,
    LightLocked,
    HeavyLocked,
    GcTransient,
}

pub type LockStateBitfield = BitField<u64, LockState, 0, 3, false>;
/// Owner thread id of a light lock.
pub type ThreadIdBitfield = BitField<u64, u32, { LockStateBitfield::NEXT_BIT }, 16, false>;
/// Recursive hold count of a light lock.
pub type LockCountBitfield = BitField<u64, u32, { ThreadIdBitfield::NEXT_BIT }, 13, false>;
/// Pool id of the heavyweight monitor; overlays the light-lock fields.
pub type MonitorIdBitfield = BitField<u64, u32, { LockStateBitfield::NEXT_BIT }, 32, false>;
/// Cached identity hash; overlays the light-lock fields.
pub type HashBitfield = BitField<u64, u32, { LockStateBitfield::NEXT_BIT }, 32, false>;

/// Largest thread id a light lock can carry inline.
pub const LIGHT_LOCK_THREAD_ID_MAX: u32 = (1 << 16) - 1;
/// Hold count at which a light lock must inflate.
pub const LIGHT_LOCK_COUNT_MAX: u32 = (1 << 13) - 1;
/// Largest monitor id the word can encode; the pool never hands out more.
pub const MONITOR_ID_MAX: u32 = u32::MAX;

impl<S: FromPrimitive> ToBitfield<S> for LockState {
    fn one() -> Self {
        unreachable!()
    }

    fn zero() -> Self {
        unreachable!()
    }

    fn to_bitfield(self) -> S {
        S::from_u8(self as u8).unwrap()
    }
}

impl<S: ToPrimitive> FromBitfield<S> for LockState {
    fn from_bitfield(value: S) -> Self {
        let value = value.to_u8().unwrap();

        match value {
            0 => Self::Unlocked,
            1 => Self::Hashed,
            2 => Self::LightLocked,
            3 => Self::HeavyLocked,
            4 => Self::GcTransient,
            _ => {
                #[cfg(debug_assertions)]
                {
                    unreachable!("invalid lock state")
                }

                #[cfg(not(debug_assertions))]
                unsafe {
                    std::hint::unreachable_unchecked();
                }
            }
        }
    }

    fn from_i64(_value: i64) -> Self {
        unreachable!()
    }
}

/// Decoded view of an object's lock word.
///
/// All bit manipulation lives here; the rest of the crate only ever sees
/// this enum plus [`encode`](LockWord::encode)/[`decode`](LockWord::decode).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum LockWord {
    Unlocked,
    Hashed { hash: u32 },
    LightLocked { owner: ThreadId, count: u32 },
    HeavyLocked { monitor: MonitorId },
    /// Installed by the collector while relocating the object. Lock
    /// operations observing it indicate a GC/mutator synchronization bug.
    GcTransient,
}

impl LockWord {
    pub fn decode(raw: u64) -> Self {
        match LockStateBitfield::decode(raw) {
            LockState::Unlocked => Self::Unlocked,
            LockState::Hashed => Self::Hashed {
                hash: HashBitfield::decode(raw),
            },
            LockState::LightLocked => Self::LightLocked {
                owner: ThreadIdBitfield::decode(raw),
                count: LockCountBitfield::decode(raw),
            },
            LockState::HeavyLocked => Self::HeavyLocked {
                monitor: MonitorIdBitfield::decode(raw),
            },
            LockState::GcTransient => Self::GcTransient,
        }
    }

    pub fn encode(self) -> u64 {
        match self {
            Self::Unlocked => LockStateBitfield::encode(LockState::Unlocked),
            Self::Hashed { hash } => {
                HashBitfield::update(hash, LockStateBitfield::encode(LockState::Hashed))
            }
            Self::LightLocked { owner, count } => {
                debug_assert!(owner != 0 && owner <= LIGHT_LOCK_THREAD_ID_MAX);
                debug_assert!(count != 0 && count <= LIGHT_LOCK_COUNT_MAX);
                LockCountBitfield::update(
                    count,
                    ThreadIdBitfield::update(
                        owner,
                        LockStateBitfield::encode(LockState::LightLocked),
                    ),
                )
            }
            Self::HeavyLocked { monitor } => {
                MonitorIdBitfield::update(monitor, LockStateBitfield::encode(LockState::HeavyLocked))
            }
            Self::GcTransient => LockStateBitfield::encode(LockState::GcTransient),
        }
    }

    pub fn state(self) -> LockState {
        match self {
            Self::Unlocked => LockState::Unlocked,
            Self::Hashed { .. } => LockState::Hashed,
            Self::LightLocked { .. } => LockState::LightLocked,
            Self::HeavyLocked { .. } => LockState::HeavyLocked,
            Self::GcTransient => LockState::GcTransient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlocked_is_all_zero() {
        assert_eq!(LockWord::Unlocked.encode(), 0);
        assert_eq!(LockWord::decode(0), LockWord::Unlocked);
    }

    #[test]
    fn light_lock_fields_survive_roundtrip() {
        let word = LockWord::LightLocked {
            owner: LIGHT_LOCK_THREAD_ID_MAX,
            count: LIGHT_LOCK_COUNT_MAX,
        };
        assert_eq!(LockWord::decode(word.encode()), word);
        assert_eq!(word.state(), LockState::LightLocked);
    }

    #[test]
    fn heavy_word_carries_full_id_range() {
        let word = LockWord::HeavyLocked {
            monitor: MONITOR_ID_MAX,
        };
        assert_eq!(LockWord::decode(word.encode()), word);
    }

    #[test]
    fn hashed_word_keeps_hash() {
        let word = LockWord::Hashed { hash: 0xdead_beef };
        let raw = word.encode();
        assert_eq!(LockStateBitfield::decode(raw), LockState::Hashed);
        assert_eq!(LockWord::decode(raw), word);
    }

    #[test]
    fn gc_transient_has_no_payload() {
        let raw = LockWord::GcTransient.encode();
        assert_eq!(LockWord::decode(raw), LockWord::GcTransient);
        assert_eq!(raw, LockStateBitfield::encode(LockState::GcTransient));
    }
}
