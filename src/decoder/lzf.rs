//! LZF decompression
//!
//! ## Stream Format
//! ```text
//! ctrl < 32          literal run: copy ctrl + 1 bytes verbatim
//! ctrl >= 32         back reference:
//!   len  = ctrl >> 5           (7 => add next byte)
//!   off  = (ctrl & 0x1f) << 8 | next byte
//!   copy len + 2 bytes from (out - off - 1), overlap allowed
//! ```

/// Most output one input byte can yield: a 3-byte back reference copies
/// at most 264 bytes
const MAX_EXPANSION: usize = 88;

/// Output reserved per input byte before decoding starts
const INITIAL_EXPANSION: usize = 4;

/// Decompress `input` into a buffer of exactly `expected_len` bytes.
///
/// The buffer grows as output is produced, so a header promising far more
/// than the input can yield is rejected without reserving it.
///
/// Any stream that under- or over-produces, or references data before the
/// start of the output, is rejected with a description of the problem.
pub(crate) fn decompress(input: &[u8], expected_len: usize) -> std::result::Result<Vec<u8>, String> {
    if expected_len > input.len().saturating_mul(MAX_EXPANSION) {
        return Err(format!(
            "{} input bytes cannot expand to {}",
            input.len(),
            expected_len
        ));
    }
    let mut out: Vec<u8> =
        Vec::with_capacity(expected_len.min(input.len().saturating_mul(INITIAL_EXPANSION)));
    let mut ip = 0usize;

    while ip < input.len() {
        let ctrl = input[ip] as usize;
        ip += 1;

        if ctrl < 32 {
            let run = ctrl + 1;
            if ip + run > input.len() {
                return Err(format!("literal run of {} overruns input", run));
            }
            if out.len() + run > expected_len {
                return Err("literal run overruns output".to_string());
            }
            out.extend_from_slice(&input[ip..ip + run]);
            ip += run;
            continue;
        }

        let mut len = ctrl >> 5;
        if len == 7 {
            let extra = *input.get(ip).ok_or("truncated back reference length")?;
            len += extra as usize;
            ip += 1;
        }
        let low = *input.get(ip).ok_or("truncated back reference offset")?;
        ip += 1;
        len += 2;

        let distance = ((ctrl & 0x1f) << 8) + low as usize + 1;
        if distance > out.len() {
            return Err(format!(
                "back reference {} bytes before start of output",
                distance - out.len()
            ));
        }
        if out.len() + len > expected_len {
            return Err("back reference overruns output".to_string());
        }

        let start = out.len() - distance;
        for i in 0..len {
            let byte = out[start + i];
            out.push(byte);
        }
    }

    if out.len() != expected_len {
        return Err(format!(
            "decompressed {} bytes, header promised {}",
            out.len(),
            expected_len
        ));
    }
    Ok(out)
}
