//! Data-file naming.
//!
//! A file's name is derived from the number of its first block. The template
//! holds up to [`MAX_TEMPLATE_DEPTH`] `%0Nx` placeholders; scanning from the
//! right, each placeholder consumes the next `4N` low bits of the block
//! number and prints them as `N` zero-padded hex digits. Leading groups thus
//! become directory levels.

use pidx_error::{PidxError, Result};

/// Most placeholders a template may contain.
pub const MAX_TEMPLATE_DEPTH: usize = 6;

#[derive(Debug, Clone, Copy)]
struct Placeholder {
    at: usize,
    digits: usize,
}

/// Expand `template` for data file `file_number`.
pub fn generate_file_name(blocks_per_file: u64, template: &str, file_number: u64) -> Result<String> {
    let placeholders = scan(template)?;
    let mut address = file_number * blocks_per_file;

    let mut values = vec![0_u64; placeholders.len()];
    for (value, ph) in values.iter_mut().zip(&placeholders).rev() {
        let bits = 4 * ph.digits as u32;
        *value = address & ((1_u64 << bits) - 1);
        address >>= bits;
    }

    let mut name = String::with_capacity(template.len() + 8);
    let mut cursor = 0;
    for (ph, value) in placeholders.iter().zip(values) {
        name.push_str(&template[cursor..ph.at]);
        name.push_str(&format!("{value:0width$x}", width = ph.digits));
        cursor = ph.at + 4;
    }
    name.push_str(&template[cursor..]);
    Ok(name)
}

/// Build the conventional template for a dataset stored at `idx_path`
/// (e.g. `out/run.idx` becomes `out/run/%04x.bin` style names).
#[must_use]
pub fn default_template(idx_path: &str, max_level: u32, bits_per_block: u32) -> String {
    let stem = idx_path
        .rfind('.')
        .filter(|&dot| !idx_path[dot..].contains('/'))
        .map_or(idx_path, |dot| &idx_path[..dot]);
    let mut template = stem.to_owned();

    let mut block_bits = max_level.saturating_sub(bits_per_block);
    if block_bits == 0 {
        template.push_str("/%01x.bin");
        return template;
    }
    block_bits = block_bits.next_multiple_of(4);
    if block_bits <= 8 {
        template.push_str("/%02x.bin");
    } else if block_bits <= 12 {
        template.push_str("/%03x.bin");
    } else if block_bits <= 16 {
        template.push_str("/%04x.bin");
    } else {
        while block_bits > 16 {
            template.push_str("/%02x");
            block_bits -= 8;
        }
        template.push_str("/%04x.bin");
    }
    template
}

fn scan(template: &str) -> Result<Vec<Placeholder>> {
    let bytes = template.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i + 3 < bytes.len() {
        if bytes[i] == b'%' && bytes[i + 1] == b'0' && bytes[i + 3] == b'x' {
            let digits = match bytes[i + 2] {
                d @ b'1'..=b'5' => usize::from(d - b'0'),
                other => {
                    return Err(unsupported(
                        template,
                        format!("width '{}' is not between 1 and 5", char::from(other)),
                    ));
                }
            };
            found.push(Placeholder { at: i, digits });
            if found.len() > MAX_TEMPLATE_DEPTH {
                return Err(unsupported(
                    template,
                    format!("more than {MAX_TEMPLATE_DEPTH} placeholders"),
                ));
            }
            i += 4;
        } else {
            i += 1;
        }
    }
    Ok(found)
}

fn unsupported(template: &str, detail: String) -> PidxError {
    PidxError::UnsupportedTemplate {
        template: template.to_owned(),
        detail,
    }
}
