/*! Implementation of the compression algorithm described in [MS-OVBA].

VBA source code and the project metadata are stored in a compressed
container: a signature byte (`0x01`) followed by a sequence of chunks. Each
chunk starts with a 2-byte header and decompresses to at most 4096 bytes.
Compressed chunks are made of token sequences, where each sequence is a flag
byte followed by up to 8 tokens. A token is either a literal byte, or a
copy token that repeats bytes already written in the same chunk.

The number of bits used for the offset and the length of a copy token
depends on how many bytes have been written in the current chunk, so the
same 16-bit value means different things at different positions.

[MS-OVBA]: https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-ovba/575462ba-bf67-4190-9fac-c275523c75fc
*/

use crate::errors::DecompressionError;


/// Maximum number of bytes produced by a single chunk.
pub const CHUNK_SIZE: usize = 4096;

const SIGNATURE: u8 = 0x01;

/// Value of the bits 12..14 in every chunk header.
const CHUNK_SIGNATURE: u16 = 0b011;

const CHUNK_COMPRESSED: u16 = 0x8000;

/// Decompresses a compressed container.
///
/// `limit` is the maximum number of bytes produced. Decompression stops with
/// [`DecompressionError::LimitExceeded`] as soon as writing the next byte
/// would exceed it.
pub fn decompress(
    data: &[u8],
    limit: usize,
) -> Result<Vec<u8>, DecompressionError> {
    decompress_at(data, 0, limit)
}

/// Decompresses the source code of a module.
///
/// Module streams start with the p-code cache, and the compressed source
/// starts at `source_offset` (the value of the `MODULEOFFSET` record).
/// Offsets reported in errors are relative to the start of the stream.
pub fn decompress_module(
    stream: &[u8],
    source_offset: u32,
    limit: usize,
) -> Result<Vec<u8>, DecompressionError> {
    let start = source_offset as usize;
    let container = stream.get(start..).ok_or(
        DecompressionError::InvalidSourceOffset {
            offset: source_offset,
            size: stream.len(),
        },
    )?;
    decompress_at(container, start, limit)
}

/// Decompresses `data`, which is located at offset `base` of some larger
/// buffer.
fn decompress_at(
    data: &[u8],
    base: usize,
    limit: usize,
) -> Result<Vec<u8>, DecompressionError> {
    match data.first() {
        Some(&SIGNATURE) => {}
        Some(&found) => {
            return Err(DecompressionError::InvalidSignature {
                offset: base,
                found,
            })
        }
        None => return Err(DecompressionError::TruncatedChunk { offset: base }),
    }

    let mut output = Vec::new();
    let mut pos = 1;

    while pos < data.len() {
        let offset = base + pos;

        let header = data
            .get(pos..pos + 2)
            .map(|h| u16::from_le_bytes([h[0], h[1]]))
            .ok_or(DecompressionError::TruncatedChunk { offset })?;

        if (header >> 12) & 0b111 != CHUNK_SIGNATURE {
            return Err(DecompressionError::InvalidChunkHeader {
                offset,
                header,
            });
        }

        // The size in the header includes the header itself, and it's
        // stored minus 3.
        let chunk_size = (header & 0x0FFF) as usize + 3;
        let chunk = data
            .get(pos + 2..pos + chunk_size)
            .ok_or(DecompressionError::TruncatedChunk { offset })?;

        if header & CHUNK_COMPRESSED == 0 {
            if chunk.len() != CHUNK_SIZE {
                return Err(DecompressionError::InvalidChunkHeader {
                    offset,
                    header,
                });
            }
            if output.len() + CHUNK_SIZE > limit {
                return Err(DecompressionError::LimitExceeded { limit });
            }
            output.extend_from_slice(chunk);
        } else {
            decompress_chunk(chunk, offset, &mut output, limit)?;
        }

        pos += chunk_size;
    }

    Ok(output)
}

/// Decompresses the body of a compressed chunk, appending the result to
/// `output`. `offset` is the offset of the chunk header.
fn decompress_chunk(
    chunk: &[u8],
    offset: usize,
    output: &mut Vec<u8>,
    limit: usize,
) -> Result<(), DecompressionError> {
    let chunk_start = output.len();
    let mut pos = 0;

    while pos < chunk.len() {
        let flags = chunk[pos];
        pos += 1;

        for bit in 0..8 {
            if pos >= chunk.len() {
                break;
            }

            let written = output.len() - chunk_start;

            if flags & (1 << bit) == 0 {
                if written >= CHUNK_SIZE {
                    return Err(DecompressionError::ChunkOverflow { offset });
                }
                if output.len() >= limit {
                    return Err(DecompressionError::LimitExceeded { limit });
                }
                output.push(chunk[pos]);
                pos += 1;
                continue;
            }

            let token_offset = offset + 2 + pos;
            let token = chunk
                .get(pos..pos + 2)
                .map(|t| u16::from_le_bytes([t[0], t[1]]))
                .ok_or(DecompressionError::TruncatedChunk { offset })?;

            let (length, distance) = unpack_copy_token(token, written);

            if distance > written || written + length > CHUNK_SIZE {
                return Err(DecompressionError::InvalidCopyToken {
                    offset: token_offset,
                    distance,
                    length,
                    available: written,
                });
            }

            if output.len() + length > limit {
                return Err(DecompressionError::LimitExceeded { limit });
            }

            // Source and destination may overlap, when that happens the
            // bytes being written are copied again, so it must be done one
            // byte at a time.
            let source = output.len() - distance;
            for i in 0..length {
                let byte = output[source + i];
                output.push(byte);
            }

            pos += 2;
        }
    }

    Ok(())
}

/// Returns the number of bits used for the offset in a copy token, given
/// the number of bytes already written in the current chunk. The rest of
/// the 16 bits are used for the length.
fn copytoken_help(written: usize) -> u32 {
    // ceil(log2(written)), with a minimum of 4 bits.
    let bit_count = match written {
        0 | 1 => 0,
        n => usize::BITS - (n - 1).leading_zeros(),
    };
    bit_count.max(4)
}

/// Splits a copy token in `(length, distance)`.
fn unpack_copy_token(token: u16, written: usize) -> (usize, usize) {
    let bit_count = copytoken_help(written);
    let length_mask = 0xFFFF_u16 >> bit_count;
    let length = (token & length_mask) as usize + 3;
    let distance = (token >> (16 - bit_count)) as usize + 1;
    (length, distance)
}

fn pack_copy_token(written: usize, distance: usize, length: usize) -> u16 {
    let bit_count = copytoken_help(written);
    (((distance - 1) << (16 - bit_count)) | (length - 3)) as u16
}

/// Compresses `data`.
///
/// This is a straightforward encoder that looks for the longest match at
/// each position. Its output is accepted by [`decompress`], which returns
/// the original `data`.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut output = vec![SIGNATURE];
    for chunk in data.chunks(CHUNK_SIZE) {
        compress_chunk(chunk, &mut output);
    }
    output
}

fn compress_chunk(chunk: &[u8], output: &mut Vec<u8>) {
    let body = encode_tokens(chunk);

    if body.len() <= CHUNK_SIZE {
        let header = CHUNK_COMPRESSED
            | (CHUNK_SIGNATURE << 12)
            | (body.len() + 2 - 3) as u16;
        output.extend_from_slice(&header.to_le_bytes());
        output.extend_from_slice(&body);
    } else if chunk.len() == CHUNK_SIZE {
        // A full chunk that doesn't compress is stored as is.
        let header = (CHUNK_SIGNATURE << 12) | (CHUNK_SIZE + 2 - 3) as u16;
        output.extend_from_slice(&header.to_le_bytes());
        output.extend_from_slice(chunk);
    } else {
        // Uncompressed chunks must have exactly 4096 bytes, a shorter
        // chunk that doesn't compress is split in two compressed chunks.
        let (head, tail) = chunk.split_at(chunk.len() / 2);
        compress_chunk(head, output);
        compress_chunk(tail, output);
    }
}

/// Encodes a chunk as a sequence of flag bytes and tokens.
fn encode_tokens(chunk: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(chunk.len() + chunk.len() / 8 + 1);
    let mut pos = 0;

    while pos < chunk.len() {
        let flags_index = body.len();
        body.push(0);

        for bit in 0..8 {
            if pos >= chunk.len() {
                break;
            }
            let (length, distance) = longest_match(chunk, pos);
            if length >= 3 {
                let token = pack_copy_token(pos, distance, length);
                body.extend_from_slice(&token.to_le_bytes());
                body[flags_index] |= 1 << bit;
                pos += length;
            } else {
                body.push(chunk[pos]);
                pos += 1;
            }
        }
    }

    body
}

/// Finds the longest match for the bytes at `pos` among the previous bytes
/// in the chunk. Returns `(length, distance)`.
fn longest_match(chunk: &[u8], pos: usize) -> (usize, usize) {
    let max_length = (0xFFFF_usize >> copytoken_help(pos)) + 3;
    let mut best = (0, 0);

    for candidate in (0..pos).rev() {
        let length = chunk[pos..]
            .iter()
            .zip(&chunk[candidate..])
            .take(max_length)
            .take_while(|(a, b)| a == b)
            .count();
        if length > best.0 {
            best = (length, pos - candidate);
        }
    }

    best
}
