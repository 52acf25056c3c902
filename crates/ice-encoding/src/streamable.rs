//! Marshaling of primitives, strings, sequences and dictionaries.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use crate::error::Error;
use crate::format::OptionalFormat;
use crate::input_stream::InputStream;
use crate::output_stream::OutputStream;

/// A type with a fixed Ice encoding.
///
/// `MIN_WIRE_SIZE` is the smallest number of bytes an encoded value can
/// occupy; sequence reads use it to reject sizes the remaining input cannot
/// hold. `FIXED_LENGTH` types always encode to exactly `MIN_WIRE_SIZE`
/// bytes.
///
/// The tagged body defaults cover structs: a fixed-length struct is
/// prefixed by its size (`VSize`), a variable-length one by a four-byte
/// length (`FSize`).
pub trait Streamable: Sized {
    const MIN_WIRE_SIZE: usize;
    const FIXED_LENGTH: bool;
    const OPTIONAL_FORMAT: OptionalFormat;

    fn write(&self, os: &mut OutputStream) -> Result<(), Error>;

    fn read(is: &mut InputStream<'_>) -> Result<Self, Error>;

    /// Writes the value as the body of a tagged member.
    fn write_tagged_body(&self, os: &mut OutputStream) -> Result<(), Error> {
        match Self::OPTIONAL_FORMAT {
            OptionalFormat::VSize if Self::FIXED_LENGTH => {
                os.write_size(Self::MIN_WIRE_SIZE)?;
                self.write(os)
            }
            OptionalFormat::FSize => {
                let pos = os.start_size();
                self.write(os)?;
                os.end_size(pos)
            }
            _ => self.write(os),
        }
    }

    fn read_tagged_body(is: &mut InputStream<'_>) -> Result<Self, Error> {
        match Self::OPTIONAL_FORMAT {
            OptionalFormat::VSize if Self::FIXED_LENGTH => is.skip_size()?,
            OptionalFormat::FSize => is.skip(4)?,
            _ => {}
        }
        Self::read(is)
    }
}

macro_rules! primitive {
    ($ty:ty, $size:expr, $format:expr, $write:ident, $read:ident) => {
        impl Streamable for $ty {
            const MIN_WIRE_SIZE: usize = $size;
            const FIXED_LENGTH: bool = true;
            const OPTIONAL_FORMAT: OptionalFormat = $format;

            fn write(&self, os: &mut OutputStream) -> Result<(), Error> {
                os.$write(*self);
                Ok(())
            }

            fn read(is: &mut InputStream<'_>) -> Result<Self, Error> {
                is.$read()
            }
        }
    };
}

primitive!(bool, 1, OptionalFormat::F1, write_bool, read_bool);
primitive!(u8, 1, OptionalFormat::F1, write_byte, read_byte);
primitive!(i16, 2, OptionalFormat::F2, write_short, read_short);
primitive!(i32, 4, OptionalFormat::F4, write_int, read_int);
primitive!(f32, 4, OptionalFormat::F4, write_float, read_float);
primitive!(i64, 8, OptionalFormat::F8, write_long, read_long);
primitive!(f64, 8, OptionalFormat::F8, write_double, read_double);

impl Streamable for String {
    const MIN_WIRE_SIZE: usize = 1;
    const FIXED_LENGTH: bool = false;
    const OPTIONAL_FORMAT: OptionalFormat = OptionalFormat::VSize;

    fn write(&self, os: &mut OutputStream) -> Result<(), Error> {
        os.write_string(self)
    }

    fn read(is: &mut InputStream<'_>) -> Result<Self, Error> {
        is.read_string()
    }

    // The string's own size prefix doubles as the VSize length.
    fn write_tagged_body(&self, os: &mut OutputStream) -> Result<(), Error> {
        self.write(os)
    }

    fn read_tagged_body(is: &mut InputStream<'_>) -> Result<Self, Error> {
        Self::read(is)
    }
}

/// Size of the VSize prefix content for `n` fixed-length elements of
/// `elem` bytes: the payload plus the width of the sequence size.
fn fixed_seq_wire_size(n: usize, elem: usize) -> usize {
    n * elem + if n < 255 { 1 } else { 5 }
}

impl<T: Streamable> Streamable for Vec<T> {
    const MIN_WIRE_SIZE: usize = 1;
    const FIXED_LENGTH: bool = false;
    const OPTIONAL_FORMAT: OptionalFormat = if T::FIXED_LENGTH {
        OptionalFormat::VSize
    } else {
        OptionalFormat::FSize
    };

    fn write(&self, os: &mut OutputStream) -> Result<(), Error> {
        os.write_size(self.len())?;
        for item in self {
            item.write(os)?;
        }
        Ok(())
    }

    fn read(is: &mut InputStream<'_>) -> Result<Self, Error> {
        let n = is.read_and_check_seq_size(T::MIN_WIRE_SIZE)?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(T::read(is)?);
        }
        Ok(out)
    }

    fn write_tagged_body(&self, os: &mut OutputStream) -> Result<(), Error> {
        if !T::FIXED_LENGTH {
            let pos = os.start_size();
            self.write(os)?;
            return os.end_size(pos);
        }
        // Byte-sized elements: the sequence size is already the length.
        if T::MIN_WIRE_SIZE > 1 {
            os.write_size(fixed_seq_wire_size(self.len(), T::MIN_WIRE_SIZE))?;
        }
        self.write(os)
    }

    fn read_tagged_body(is: &mut InputStream<'_>) -> Result<Self, Error> {
        if !T::FIXED_LENGTH {
            is.skip(4)?;
        } else if T::MIN_WIRE_SIZE > 1 {
            is.skip_size()?;
        }
        Self::read(is)
    }
}

macro_rules! dictionary {
    ($map:ident, $($bound:ident),+) => {
        impl<K, V> Streamable for $map<K, V>
        where
            K: Streamable $(+ $bound)+,
            V: Streamable,
        {
            const MIN_WIRE_SIZE: usize = 1;
            const FIXED_LENGTH: bool = false;
            const OPTIONAL_FORMAT: OptionalFormat = if K::FIXED_LENGTH && V::FIXED_LENGTH {
                OptionalFormat::VSize
            } else {
                OptionalFormat::FSize
            };

            fn write(&self, os: &mut OutputStream) -> Result<(), Error> {
                os.write_size(self.len())?;
                for (k, v) in self {
                    k.write(os)?;
                    v.write(os)?;
                }
                Ok(())
            }

            fn read(is: &mut InputStream<'_>) -> Result<Self, Error> {
                let n = is.read_and_check_seq_size(K::MIN_WIRE_SIZE + V::MIN_WIRE_SIZE)?;
                let mut out = $map::new();
                for _ in 0..n {
                    let k = K::read(is)?;
                    let v = V::read(is)?;
                    out.insert(k, v);
                }
                Ok(out)
            }

            fn write_tagged_body(&self, os: &mut OutputStream) -> Result<(), Error> {
                if K::FIXED_LENGTH && V::FIXED_LENGTH {
                    let elem = K::MIN_WIRE_SIZE + V::MIN_WIRE_SIZE;
                    os.write_size(fixed_seq_wire_size(self.len(), elem))?;
                    self.write(os)
                } else {
                    let pos = os.start_size();
                    self.write(os)?;
                    os.end_size(pos)
                }
            }

            fn read_tagged_body(is: &mut InputStream<'_>) -> Result<Self, Error> {
                if K::FIXED_LENGTH && V::FIXED_LENGTH {
                    is.skip_size()?;
                } else {
                    is.skip(4)?;
                }
                Self::read(is)
            }
        }
    };
}

dictionary!(BTreeMap, Ord);
dictionary!(HashMap, Eq, Hash);
