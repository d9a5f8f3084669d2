//! On-disk file formats: the packed-trie file and the legacy
//! writable-trie/MWT file. Both use fixed-width little-endian primitives
//! so the file is portable between host endiannesses — byte order is
//! explicit at every read/write, never the host's native order.

use std::io::{Read, Write};
#[cfg(feature = "mmap")]
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, TrieError};
use crate::keys::BitsPerLevel;
use crate::mwt::MultiWritableTrie;
use crate::pt::{PackedTrie, ValueMap};

/// 8-byte signature of a packed-trie file.
pub const PACKED_SIGNATURE: &[u8; 8] = b"MulTrie\0";
/// 8-byte signature of a legacy writable-trie/MWT file.
pub const LEGACY_SIGNATURE: &[u8; 8] = b"MulTrieW";

/// Current packed-trie format version. Readers also accept version 2.
pub const PACKED_VERSION_CURRENT: u8 = 3;
const PACKED_VERSION_PREVIOUS: u8 = 2;

/// Current legacy-format version. Readers also accept the immediately
/// previous version.
pub const LEGACY_VERSION_CURRENT: u8 = 2;
const LEGACY_VERSION_PREVIOUS: u8 = 1;

/// Reserved padding length for the packed-trie header: 59 bytes at the
/// current version, 58 at the previous one.
fn packed_pad_len(version: u8) -> usize {
    if version == PACKED_VERSION_CURRENT {
        59
    } else {
        58
    }
}

const LEGACY_PAD_LEN: usize = 64;

fn check_signature(found: &[u8; 8], expected: &'static [u8; 8]) -> Result<()> {
    if found != expected {
        return Err(TrieError::BadSignature {
            expected,
            found: found.to_vec(),
        });
    }
    Ok(())
}

fn read_signature<R: Read>(r: &mut R) -> Result<[u8; 8]> {
    let mut sig = [0u8; 8];
    r.read_exact(&mut sig)?;
    Ok(sig)
}

fn skip_padding<R: Read>(r: &mut R, len: usize) -> Result<()> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(())
}

fn write_padding<W: Write>(w: &mut W, len: usize) -> Result<()> {
    let buf = vec![0u8; len];
    w.write_all(&buf)?;
    Ok(())
}

/// Write `pt` to `writer` in the current packed-trie format.
pub fn write_packed_trie<W: Write>(
    writer: &mut W,
    pt: &PackedTrie,
) -> Result<()> {
    writer.write_all(PACKED_SIGNATURE)?;
    writer.write_u8(PACKED_VERSION_CURRENT)?;
    writer.write_u8(pt.bits().as_u8())?;

    writer.write_u32::<LittleEndian>(pt.num_full_nodes() as u32)?;
    writer.write_u32::<LittleEndian>(pt.longest_key())?;
    writer.write_u32::<LittleEndian>(pt.num_frequency_records() as u32)?;
    writer.write_u32::<LittleEndian>(pt.num_terminal_nodes() as u32)?;

    writer.write_u8(pt.ignore_whitespace() as u8)?;
    writer.write_u8(pt.case_sensitivity())?;

    write_padding(writer, packed_pad_len(PACKED_VERSION_CURRENT))?;

    let bitmap_words = pt.bitmap_words();
    for i in 0..pt.num_full_nodes() {
        let (first_child, bitmap, freq_index) = pt.full_node_raw(i);
        writer.write_u32::<LittleEndian>(first_child)?;
        debug_assert_eq!(bitmap.len(), bitmap_words);
        for &word in bitmap {
            writer.write_u32::<LittleEndian>(word)?;
        }
        writer.write_u32::<LittleEndian>(freq_index)?;
    }

    for i in 0..pt.num_frequency_records() {
        writer.write_u32::<LittleEndian>(pt.freq_record_raw(i))?;
    }

    for i in 0..pt.num_terminal_nodes() {
        writer.write_u32::<LittleEndian>(pt.terminal_node_raw(i))?;
    }

    Ok(())
}

/// Read a [`PackedTrie`] from `reader`. `reader_bits` is the bits-per-level
/// this build is compiled for; a mismatch against the file's own header
/// byte is a hard [`TrieError::BitsPerLevelMismatch`]. `value_map` supplies
/// the scoring-value lookup table, which is not persisted on disk.
pub fn read_packed_trie<R: Read>(
    reader: &mut R,
    reader_bits: BitsPerLevel,
    value_map: ValueMap,
) -> Result<PackedTrie> {
    let sig = read_signature(reader)?;
    check_signature(&sig, PACKED_SIGNATURE)?;

    let version = reader.read_u8()?;
    if version != PACKED_VERSION_CURRENT && version != PACKED_VERSION_PREVIOUS {
        return Err(TrieError::UnsupportedVersion(version));
    }

    let file_bits = reader.read_u8()?;
    if file_bits != reader_bits.as_u8() {
        return Err(TrieError::BitsPerLevelMismatch {
            file: file_bits,
            reader: reader_bits.as_u8(),
        });
    }

    let num_full_nodes = reader.read_u32::<LittleEndian>()? as usize;
    let longest_key = reader.read_u32::<LittleEndian>()?;
    let num_frequency_records = reader.read_u32::<LittleEndian>()? as usize;
    let num_terminal_nodes = reader.read_u32::<LittleEndian>()? as usize;

    let ignore_whitespace = reader.read_u8()? != 0;
    let case_sensitivity = reader.read_u8()?;

    skip_padding(reader, packed_pad_len(version))?;

    let bitmap_words = reader_bits.fanout().div_ceil(32);
    let mut full_nodes = Vec::with_capacity(num_full_nodes);
    for _ in 0..num_full_nodes {
        let first_child = reader.read_u32::<LittleEndian>()?;
        let mut bitmap = Vec::with_capacity(bitmap_words);
        for _ in 0..bitmap_words {
            bitmap.push(reader.read_u32::<LittleEndian>()?);
        }
        let freq_index = reader.read_u32::<LittleEndian>()?;
        full_nodes.push((first_child, bitmap, freq_index));
    }

    let mut freq_records = Vec::with_capacity(num_frequency_records);
    for _ in 0..num_frequency_records {
        freq_records.push(reader.read_u32::<LittleEndian>()?);
    }

    let mut terminal_nodes = Vec::with_capacity(num_terminal_nodes);
    for _ in 0..num_terminal_nodes {
        terminal_nodes.push(reader.read_u32::<LittleEndian>()?);
    }

    Ok(PackedTrie::from_raw_parts(
        reader_bits,
        ignore_whitespace,
        case_sensitivity,
        longest_key,
        full_nodes,
        terminal_nodes,
        freq_records,
        value_map,
    ))
}

/// Write `mwt` to `writer` in the legacy writable-trie/MWT format: a
/// signature + version/bits header, `numUsed`/`numTokens`/`longestKey`
/// fields, 64 bytes of padding, then raw node records followed by a
/// frequency-arena count and the arena itself.
pub fn write_legacy_mwt<W: Write>(
    writer: &mut W,
    mwt: &MultiWritableTrie,
    longest_key: u32,
) -> Result<()> {
    writer.write_all(LEGACY_SIGNATURE)?;
    writer.write_u8(LEGACY_VERSION_CURRENT)?;
    writer.write_u8(mwt.bits().as_u8())?;

    let num_nodes = mwt.num_nodes();
    writer.write_u32::<LittleEndian>(num_nodes as u32)?; // numUsed
    writer.write_u32::<LittleEndian>(num_nodes as u32)?; // numTokens
    writer.write_u32::<LittleEndian>(longest_key)?;

    write_padding(writer, LEGACY_PAD_LEN)?;

    let fanout = mwt.bits().fanout();
    for i in 0..num_nodes {
        let (children, freq_head, is_leaf) = mwt.node_raw(i as u32);
        debug_assert_eq!(children.len(), fanout);
        for &c in children {
            writer.write_u32::<LittleEndian>(c)?;
        }
        writer.write_u32::<LittleEndian>(freq_head)?;
        writer.write_u8(is_leaf as u8)?;
    }

    let num_records = mwt.num_frequency_records();
    writer.write_u32::<LittleEndian>(num_records as u32)?;
    for i in 0..num_records {
        let (next, frequency, lang_and_flag) = mwt.freq_record_raw(i as u32);
        writer.write_u32::<LittleEndian>(next)?;
        writer.write_u32::<LittleEndian>(frequency)?;
        writer.write_u32::<LittleEndian>(lang_and_flag)?;
    }

    Ok(())
}

/// Read a [`MultiWritableTrie`] from the legacy format. `reader_bits` must
/// match the file's bits-per-level byte.
pub fn read_legacy_mwt<R: Read>(
    reader: &mut R,
    reader_bits: BitsPerLevel,
    ignore_whitespace: bool,
) -> Result<MultiWritableTrie> {
    let sig = read_signature(reader)?;
    check_signature(&sig, LEGACY_SIGNATURE)?;

    let version = reader.read_u8()?;
    if version != LEGACY_VERSION_CURRENT && version != LEGACY_VERSION_PREVIOUS {
        return Err(TrieError::UnsupportedVersion(version));
    }

    let file_bits = reader.read_u8()?;
    if file_bits != reader_bits.as_u8() {
        return Err(TrieError::BitsPerLevelMismatch {
            file: file_bits,
            reader: reader_bits.as_u8(),
        });
    }

    let num_used = reader.read_u32::<LittleEndian>()? as usize;
    let _num_tokens = reader.read_u32::<LittleEndian>()?;
    let _longest_key = reader.read_u32::<LittleEndian>()?;

    skip_padding(reader, LEGACY_PAD_LEN)?;

    let fanout = reader_bits.fanout();
    let mut nodes_raw = Vec::with_capacity(num_used);
    for _ in 0..num_used {
        let mut children = Vec::with_capacity(fanout);
        for _ in 0..fanout {
            children.push(reader.read_u32::<LittleEndian>()?);
        }
        let freq_head = reader.read_u32::<LittleEndian>()?;
        let is_leaf = reader.read_u8()? != 0;
        nodes_raw.push((children, freq_head, is_leaf));
    }

    let num_records = reader.read_u32::<LittleEndian>()? as usize;
    let mut records_raw = Vec::with_capacity(num_records);
    for _ in 0..num_records {
        let next = reader.read_u32::<LittleEndian>()?;
        let frequency = reader.read_u32::<LittleEndian>()?;
        let lang_and_flag = reader.read_u32::<LittleEndian>()?;
        records_raw.push((next, frequency, lang_and_flag));
    }

    Ok(MultiWritableTrie::from_raw_parts(
        reader_bits,
        ignore_whitespace,
        nodes_raw,
        records_raw,
    ))
}

/// Load a packed-trie file by memory-mapping it rather than copying it
/// into an owned buffer. Only available with the `mmap` feature; the
/// mapping is read once into a `Cursor` here because
/// [`PackedTrie::from_raw_parts`] owns its arrays — a zero-copy mapped
/// `PackedTrie` would require the node types to borrow from the mapping,
/// which a pointer-based trie gets for free and this index-based one
/// trades away for memory safety.
#[cfg(feature = "mmap")]
pub fn load_packed_trie_mmap<P: AsRef<Path>>(
    path: P,
    reader_bits: BitsPerLevel,
    value_map: ValueMap,
) -> Result<PackedTrie> {
    let file = std::fs::File::open(path)?;
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    let mut cursor = std::io::Cursor::new(&mmap[..]);
    read_packed_trie(&mut cursor, reader_bits, value_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::BitsPerLevel;
    use std::io::Cursor;

    fn sample_mwt() -> MultiWritableTrie {
        let mut mwt = MultiWritableTrie::new(BitsPerLevel::Eight, false, 16);
        mwt.set_frequency(b"cat", 3, 1, 10, false).unwrap();
        mwt.set_frequency(b"dog", 3, 1, 5, false).unwrap();
        mwt.set_frequency(b"cat", 3, 2, 8, false).unwrap();
        mwt
    }

    #[test]
    fn packed_trie_round_trips_through_bytes() {
        let mwt = sample_mwt();
        let pt = PackedTrie::from_mwt(&mwt, false, 0, ValueMap::default_map()).unwrap();

        let mut buf = Vec::new();
        write_packed_trie(&mut buf, &pt).unwrap();

        let loaded = read_packed_trie(
            &mut Cursor::new(&buf),
            BitsPerLevel::Eight,
            ValueMap::default_map(),
        )
        .unwrap();

        assert_eq!(loaded.num_full_nodes(), pt.num_full_nodes());
        assert_eq!(loaded.num_terminal_nodes(), pt.num_terminal_nodes());
        assert_eq!(loaded.num_frequency_records(), pt.num_frequency_records());
        assert_eq!(loaded.records(b"cat"), pt.records(b"cat"));
        assert_eq!(loaded.records(b"dog"), pt.records(b"dog"));
    }

    #[test]
    fn packed_trie_rejects_bad_signature() {
        let mut buf = vec![0u8; 8];
        buf[0] = b'X';
        let err = read_packed_trie(
            &mut Cursor::new(&buf),
            BitsPerLevel::Eight,
            ValueMap::default_map(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn packed_trie_rejects_bits_per_level_mismatch() {
        let mwt = sample_mwt();
        let pt = PackedTrie::from_mwt(&mwt, false, 0, ValueMap::default_map()).unwrap();
        let mut buf = Vec::new();
        write_packed_trie(&mut buf, &pt).unwrap();
        let err = read_packed_trie(
            &mut Cursor::new(&buf),
            BitsPerLevel::Two,
            ValueMap::default_map(),
        );
        assert!(matches!(err, Err(TrieError::BitsPerLevelMismatch { .. })));
    }

    #[test]
    fn packed_trie_rejects_unsupported_version() {
        let mwt = sample_mwt();
        let pt = PackedTrie::from_mwt(&mwt, false, 0, ValueMap::default_map()).unwrap();
        let mut buf = Vec::new();
        write_packed_trie(&mut buf, &pt).unwrap();
        buf[8] = 99; // version byte
        let err = read_packed_trie(
            &mut Cursor::new(&buf),
            BitsPerLevel::Eight,
            ValueMap::default_map(),
        );
        assert!(matches!(err, Err(TrieError::UnsupportedVersion(99))));
    }

    #[test]
    fn legacy_mwt_round_trips_through_bytes() {
        let mwt = sample_mwt();
        let mut buf = Vec::new();
        write_legacy_mwt(&mut buf, &mwt, 3).unwrap();

        let loaded =
            read_legacy_mwt(&mut Cursor::new(&buf), BitsPerLevel::Eight, false).unwrap();

        assert_eq!(loaded.frequency(b"cat", 3, 1), mwt.frequency(b"cat", 3, 1));
        assert_eq!(loaded.frequency(b"cat", 3, 2), mwt.frequency(b"cat", 3, 2));
        assert_eq!(loaded.frequency(b"dog", 3, 1), mwt.frequency(b"dog", 3, 1));
        assert_eq!(
            loaded.num_frequency_records(),
            mwt.num_frequency_records()
        );
    }

    #[test]
    fn file_determinism_same_trie_same_bytes() {
        let mwt = sample_mwt();
        let pt = PackedTrie::from_mwt(&mwt, false, 0, ValueMap::default_map()).unwrap();
        let mut a = Vec::new();
        let mut b = Vec::new();
        write_packed_trie(&mut a, &pt).unwrap();
        write_packed_trie(&mut b, &pt).unwrap();
        assert_eq!(a, b);
    }
}
