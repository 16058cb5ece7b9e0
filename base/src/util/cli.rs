use std::fmt::Debug;
use std::str::FromStr;

use arrayvec::ArrayVec;

use crate::defs::{Error, ErrorKind::*, Result};

/// Comma-separated fixed-size value array for structopt options.
#[derive(Clone)]
pub struct Array<T: Clone + FromStr, const N: usize>(pub [T; N]);

impl<T: Clone + Debug + Default + FromStr, const N: usize> FromStr
    for Array<T, N>
{
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed_err = || {
            let desc = format!("malformed value array '{}'", s);
            Error::new(MalformedData, desc)
        };

        let parse = |iter: &mut std::str::Split<char>| {
            let part = iter.next().ok_or_else(malformed_err)?;
            if part.is_empty() {
                Ok(T::default())
            } else {
                part.parse::<T>().map_err(|_| malformed_err())
            }
        };

        let mut iter = s.split(',');
        let mut vec = ArrayVec::<T, N>::new();

        for _ in 0..N {
            vec.push(parse(&mut iter)?);
        }

        if iter.next().is_some() {
            return Err(malformed_err());
        }

        Ok(Array(vec.into_inner().unwrap()))
    }
}

impl<T: Clone + FromStr, const N: usize> From<[T; N]> for Array<T, N> {
    fn from(array: [T; N]) -> Self {
        Self(array)
    }
}
