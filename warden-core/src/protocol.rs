//! Length-prefixed framing and the tagged-term wire format used to
//! exchange requests and responses with the controlling process.
//!
//! Transport details (which process opens the two descriptors, how it
//! decides when to write) are out of scope here; this module only
//! implements `decode(bytes) -> Term` and `encode(Term) -> bytes`.

use std::io::{self, Read, Write};

/// A decoded wire value.
///
/// Mirrors a small subset of Erlang's external term format: atoms,
/// strings, integers, tuples, and lists are all this protocol needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Term
{
    /// A short, interned-like symbol such as `ok` or `stdout`.
    Atom(String),
    /// A UTF-8 string.
    Str(String),
    /// A signed 64-bit integer.
    Int(i64),
    /// A fixed-size heterogeneous sequence.
    Tuple(Vec<Term>),
    /// A variable-length homogeneous-in-practice sequence.
    List(Vec<Term>),
}

impl Term
{
    /// Borrow this term as an atom's name, if it is one.
    pub fn as_atom(&self) -> Option<&str>
    {
        match self {
            Term::Atom(s) => Some(s),
            _             => None,
        }
    }

    /// Borrow this term as a string, if it is one.
    pub fn as_str(&self) -> Option<&str>
    {
        match self {
            Term::Str(s) => Some(s),
            _            => None,
        }
    }

    /// Borrow this term as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64>
    {
        match self {
            Term::Int(n) => Some(*n),
            _            => None,
        }
    }

    /// Borrow this term as a tuple's elements, if it is one.
    pub fn as_tuple(&self) -> Option<&[Term]>
    {
        match self {
            Term::Tuple(xs) => Some(xs),
            _               => None,
        }
    }

    /// Borrow this term as a list's elements, if it is one.
    pub fn as_list(&self) -> Option<&[Term]>
    {
        match self {
            Term::List(xs) => Some(xs),
            _              => None,
        }
    }
}

const TAG_ATOM:  u8 = 1;
const TAG_STR:   u8 = 2;
const TAG_INT:   u8 = 3;
const TAG_TUPLE: u8 = 4;
const TAG_LIST:  u8 = 5;

/// Decode one [`Term`] from `r`.
pub fn decode_term(r: &mut impl Read) -> io::Result<Term>
{
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;

    match tag[0] {
        TAG_ATOM  => Ok(Term::Atom(read_string(r, 1)?)),
        TAG_STR   => Ok(Term::Str(read_string(r, 4)?)),
        TAG_INT   => {
            let mut buf = [0u8; 8];
            r.read_exact(&mut buf)?;
            Ok(Term::Int(i64::from_be_bytes(buf)))
        },
        TAG_TUPLE => {
            let count = read_count(r, 2)?;
            let elems = (0 .. count).map(|_| decode_term(r)).collect::<io::Result<_>>()?;
            Ok(Term::Tuple(elems))
        },
        TAG_LIST  => {
            let count = read_count(r, 4)?;
            let elems = (0 .. count).map(|_| decode_term(r)).collect::<io::Result<_>>()?;
            Ok(Term::List(elems))
        },
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown term tag {other}"),
        )),
    }
}

/// Encode one [`Term`] to `w`.
pub fn encode_term(term: &Term, w: &mut impl Write) -> io::Result<()>
{
    match term {
        Term::Atom(s) => { w.write_all(&[TAG_ATOM])?; write_string(w, s, 1) },
        Term::Str(s)  => { w.write_all(&[TAG_STR])?; write_string(w, s, 4) },
        Term::Int(n)  => { w.write_all(&[TAG_INT])?; w.write_all(&n.to_be_bytes()) },
        Term::Tuple(xs) => {
            w.write_all(&[TAG_TUPLE])?;
            write_count(w, xs.len(), 2)?;
            xs.iter().try_for_each(|x| encode_term(x, w))
        },
        Term::List(xs) => {
            w.write_all(&[TAG_LIST])?;
            write_count(w, xs.len(), 4)?;
            xs.iter().try_for_each(|x| encode_term(x, w))
        },
    }
}

fn read_count(r: &mut impl Read, width: usize) -> io::Result<usize>
{
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf[4 - width ..])?;
    Ok(u32::from_be_bytes(buf) as usize)
}

fn write_count(w: &mut impl Write, count: usize, width: usize) -> io::Result<()>
{
    let buf = (count as u32).to_be_bytes();
    w.write_all(&buf[4 - width ..])
}

fn read_string(r: &mut impl Read, width: usize) -> io::Result<String>
{
    let len = read_count(r, width)?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_string(w: &mut impl Write, s: &str, width: usize) -> io::Result<()>
{
    write_count(w, s.len(), width)?;
    w.write_all(s.as_bytes())
}

/// Reads length-prefixed request frames and writes length-prefixed
/// response frames on a pair of file descriptors.
///
/// Frames are `u16` big-endian length followed by exactly that many
/// bytes of encoded [`Term`].
pub struct FrameCodec<R, W>
{
    request:  R,
    response: W,
}

impl<R: Read, W: Write> FrameCodec<R, W>
{
    /// Wrap an already-open request reader and response writer.
    pub fn new(request: R, response: W) -> Self
    {
        Self{request, response}
    }

    /// Read the next request frame and decode it as a [`Term`].
    ///
    /// Returns `Ok(None)` at a clean end of stream (the controlling
    /// process closed the request descriptor).
    pub fn read_request(&mut self) -> io::Result<Option<Term>>
    {
        let mut len_buf = [0u8; 2];
        match self.request.read_exact(&mut len_buf) {
            Ok(())                                                    => {},
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof         => return Ok(None),
            Err(e)                                                    => return Err(e),
        }

        let len = u16::from_be_bytes(len_buf) as usize;
        let mut frame = vec![0u8; len];
        self.request.read_exact(&mut frame)?;

        decode_term(&mut &frame[..]).map(Some)
    }

    /// Encode `term` and write it as a response frame.
    pub fn write_response(&mut self, term: &Term) -> io::Result<()>
    {
        let mut frame = Vec::new();
        encode_term(term, &mut frame)?;

        let len = u16::try_from(frame.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "response frame too large")
        })?;

        self.response.write_all(&len.to_be_bytes())?;
        self.response.write_all(&frame)?;
        self.response.flush()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn round_trip_tuple()
    {
        let term = Term::Tuple(vec![
            Term::Int(7),
            Term::Tuple(vec![
                Term::Str("/bin/ls".to_owned()),
                Term::List(vec![
                    Term::Tuple(vec![Term::Atom("nice".to_owned()), Term::Int(5)]),
                ]),
            ]),
        ]);

        let mut buf = Vec::new();
        encode_term(&term, &mut buf).unwrap();
        let decoded = decode_term(&mut &buf[..]).unwrap();
        assert_eq!(decoded, term);
    }

    #[test]
    fn frame_codec_round_trip()
    {
        let request = Term::Tuple(vec![Term::Int(1), Term::Atom("ok".to_owned())]);

        let mut wire = Vec::new();
        {
            let mut codec = FrameCodec::new(&[][..], &mut wire);
            codec.write_response(&request).unwrap();
        }

        let mut codec = FrameCodec::new(&wire[..], std::io::sink());
        let decoded = codec.read_request().unwrap().unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn empty_stream_is_clean_eof()
    {
        let mut codec = FrameCodec::new(&[][..], std::io::sink());
        assert_eq!(codec.read_request().unwrap(), None);
    }
}
