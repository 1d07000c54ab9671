//! Bidirectional state I/O for model round trips.
//!
//! Every learner serializes its state through a [`StateIo`], which is either
//! reading or writing. Each field accessor works in both directions, so a
//! learner's `save_load` is one function and the on-disk field order is
//! identical between save and load by construction.
//!
//! A text mode exists for human inspection of the payload; it writes
//! `name = value` lines and is not round-trippable.

use std::io::{Read, Write};

use crate::error::{CoreError, Result};

enum Mode<'a> {
    Read(&'a mut dyn Read),
    Write(&'a mut dyn Write),
}

/// A reading-or-writing view over a model stream.
pub struct StateIo<'a> {
    mode: Mode<'a>,
    text: bool,
}

impl<'a> StateIo<'a> {
    /// A reader over a binary model stream.
    pub fn reader(r: &'a mut dyn Read) -> Self {
        Self {
            mode: Mode::Read(r),
            text: false,
        }
    }

    /// A writer over a binary model stream.
    pub fn writer(w: &'a mut dyn Write) -> Self {
        Self {
            mode: Mode::Write(w),
            text: false,
        }
    }

    /// A writer producing the human-readable text dump.
    pub fn text_writer(w: &'a mut dyn Write) -> Self {
        Self {
            mode: Mode::Write(w),
            text: true,
        }
    }

    /// True when this I/O is deserializing.
    pub fn is_read(&self) -> bool {
        matches!(self.mode, Mode::Read(_))
    }

    fn emit(&mut self, name: &str, bytes: &[u8], display: impl Fn() -> String) -> Result<()> {
        match &mut self.mode {
            Mode::Write(w) => {
                if self.text {
                    writeln!(w, "{name} = {}", display())?;
                } else {
                    w.write_all(bytes)?;
                }
                Ok(())
            }
            Mode::Read(_) => unreachable!("emit called while reading"),
        }
    }

    fn take(&mut self, buf: &mut [u8]) -> Result<()> {
        match &mut self.mode {
            Mode::Read(r) => {
                r.read_exact(buf)?;
                Ok(())
            }
            Mode::Write(_) => unreachable!("take called while writing"),
        }
    }

    /// Serializes or deserializes one f32 field.
    pub fn f32_field(&mut self, name: &str, value: &mut f32) -> Result<()> {
        if self.is_read() {
            let mut buf = [0u8; 4];
            self.take(&mut buf)?;
            *value = f32::from_le_bytes(buf);
            Ok(())
        } else {
            let v = *value;
            self.emit(name, &v.to_le_bytes(), || v.to_string())
        }
    }

    /// Serializes or deserializes one u32 field.
    pub fn u32_field(&mut self, name: &str, value: &mut u32) -> Result<()> {
        if self.is_read() {
            let mut buf = [0u8; 4];
            self.take(&mut buf)?;
            *value = u32::from_le_bytes(buf);
            Ok(())
        } else {
            let v = *value;
            self.emit(name, &v.to_le_bytes(), || v.to_string())
        }
    }

    /// Serializes or deserializes one u64 field.
    pub fn u64_field(&mut self, name: &str, value: &mut u64) -> Result<()> {
        if self.is_read() {
            let mut buf = [0u8; 8];
            self.take(&mut buf)?;
            *value = u64::from_le_bytes(buf);
            Ok(())
        } else {
            let v = *value;
            self.emit(name, &v.to_le_bytes(), || v.to_string())
        }
    }

    /// Serializes or deserializes a length-prefixed f32 vector.
    pub fn vec_f32_field(&mut self, name: &str, value: &mut Vec<f32>) -> Result<()> {
        let mut len = value.len() as u64;
        self.u64_field(name, &mut len)?;
        if self.is_read() {
            if len > u32::MAX as u64 {
                return Err(CoreError::SerializationError {
                    message: format!("implausible vector length for {name}: {len}"),
                });
            }
            value.clear();
            value.reserve(len as usize);
            for _ in 0..len {
                let mut v = 0.0f32;
                self.f32_field(name, &mut v)?;
                value.push(v);
            }
        } else {
            for (i, v) in value.iter_mut().enumerate() {
                let field = format!("{name}[{i}]");
                let mut x = *v;
                self.f32_field(&field, &mut x)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_round_trip() {
        let mut buf = Vec::new();
        {
            let mut io = StateIo::writer(&mut buf);
            let mut a = 1.5f32;
            let mut b = 42u32;
            let mut c = u64::MAX;
            let mut v = vec![0.5f32, -0.25];
            io.f32_field("a", &mut a).unwrap();
            io.u32_field("b", &mut b).unwrap();
            io.u64_field("c", &mut c).unwrap();
            io.vec_f32_field("v", &mut v).unwrap();
        }
        let mut cursor = std::io::Cursor::new(buf);
        let mut io = StateIo::reader(&mut cursor);
        let (mut a, mut b, mut c, mut v) = (0.0f32, 0u32, 0u64, Vec::new());
        io.f32_field("a", &mut a).unwrap();
        io.u32_field("b", &mut b).unwrap();
        io.u64_field("c", &mut c).unwrap();
        io.vec_f32_field("v", &mut v).unwrap();
        assert_eq!(a, 1.5);
        assert_eq!(b, 42);
        assert_eq!(c, u64::MAX);
        assert_eq!(v, vec![0.5, -0.25]);
    }

    #[test]
    fn test_text_mode_is_human_readable() {
        let mut buf = Vec::new();
        {
            let mut io = StateIo::text_writer(&mut buf);
            let mut a = 2.0f32;
            io.f32_field("alpha", &mut a).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "alpha = 2\n");
    }

    #[test]
    fn test_short_read_is_an_error() {
        let data = vec![0u8; 2];
        let mut cursor = std::io::Cursor::new(data);
        let mut io = StateIo::reader(&mut cursor);
        let mut v = 0.0f32;
        assert!(io.f32_field("a", &mut v).is_err());
    }
}
