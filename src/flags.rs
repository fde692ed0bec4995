//! Plain bitfield words as they appear on disk.
//!
//! Change flags and the various status bytes are opaque at this layer; what a
//! bit means depends entirely on the record that owns the word. Decoders that
//! do know the meanings wrap these in their own `bitflags` types.

use std::fmt;

use nom::number::complete::{le_u16, le_u32, le_u8};

use crate::error::PResult;
use crate::primitives::{put_u16, put_u32, put_u8};

macro_rules! flags_type {
    ($name:ident, $raw:ty, $reader:ident, $parser:ident, $writer:ident, $putter:ident) => {
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name(pub $raw);

        impl $name {
            pub fn get(self, position: u32) -> bool {
                debug_assert!(position < <$raw>::BITS);
                self.0 >> position & 1 == 1
            }

            #[must_use]
            pub fn with(self, position: u32) -> Self {
                $name(self.0 | (1 as $raw) << position)
            }

            #[must_use]
            pub fn without(self, position: u32) -> Self {
                $name(self.0 & !((1 as $raw) << position))
            }

            pub fn get_any(self, positions: &[u32]) -> bool {
                positions.iter().any(|&position| self.get(position))
            }

            pub fn all_zero(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{:0width$b}", self.0, width = <$raw>::BITS as usize)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}(0b{})", stringify!($name), self)
            }
        }

        impl From<$raw> for $name {
            fn from(raw: $raw) -> Self {
                $name(raw)
            }
        }

        pub fn $parser(input: &[u8]) -> PResult<$name> {
            let (input, raw) = $reader(input)?;
            Ok((input, $name(raw)))
        }

        pub fn $putter(out: &mut Vec<u8>, flags: $name) {
            $writer(out, flags.0);
        }
    };
}

flags_type!(Flags8, u8, le_u8, flags8, put_u8, put_flags8);
flags_type!(Flags16, u16, le_u16, flags16, put_u16, put_flags16);
flags_type!(Flags32, u32, le_u32, flags32, put_u32, put_flags32);
