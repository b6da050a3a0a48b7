// CLASSIFICATION: COMMUNITY
// Filename: ptx.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Just enough PTX reading for the mock driver: header validation, kernel
//! entry names and module-scope `.global` and `.const` variables with their
//! sizes.

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PtxSymbols {
    pub entries: Vec<String>,
    pub globals: Vec<(String, usize)>,
}

/// Drop `//` and `/* */` comments.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("//") {
            rest = after.find('\n').map_or("", |i| &after[i..]);
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |i| &after[i + 2..]);
            out.push(' ');
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }
    }
    out
}

/// A module must declare `.version` and `.target` and balance its braces.
pub fn is_valid(text: &str) -> bool {
    let body = strip_comments(text);
    let mut has_version = false;
    let mut has_target = false;
    for tok in body.split_whitespace() {
        match tok {
            ".version" => has_version = true,
            ".target" => has_target = true,
            _ => {}
        }
    }
    let mut depth: i64 = 0;
    for c in body.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    has_version && has_target && depth == 0
}

fn type_size(tok: &str) -> Option<usize> {
    let bits: usize = tok
        .strip_prefix('.')
        .filter(|t| matches!(t.as_bytes().first(), Some(b'b' | b'u' | b's' | b'f')))
        .and_then(|t| t[1..].parse().ok())?;
    matches!(bits, 8 | 16 | 32 | 64).then_some(bits / 8)
}

/// `name[4][2]` -> (`name`, 8); `name` -> (`name`, 1). Unsized `[]` counts
/// as zero elements.
fn split_extent(decl: &str) -> (&str, usize) {
    let Some(open) = decl.find('[') else {
        return (decl, 1);
    };
    let name = &decl[..open];
    let mut count = 1usize;
    for dim in decl[open..].split('[').skip(1) {
        let n = dim.trim_end_matches(']').trim();
        count = count.saturating_mul(n.parse().unwrap_or(0));
    }
    (name, count)
}

/// `decl` is a declaration with any initializer already cut off.
fn parse_global(decl: &str) -> Option<(String, usize)> {
    let tokens: Vec<&str> = decl.split_whitespace().collect();
    let addressable = tokens.contains(&".global") || tokens.contains(&".const");
    if !addressable || tokens.contains(&".extern") {
        return None;
    }
    let elem = tokens.iter().find_map(|t| type_size(t)).unwrap_or(1);
    let last = tokens.last()?;
    if last.starts_with('.') {
        return None;
    }
    let (name, count) = split_extent(last);
    Some((name.to_string(), elem.saturating_mul(count)))
}

/// Collect kernel entries and module-scope globals.
pub fn parse(text: &str) -> PtxSymbols {
    let body = strip_comments(text);
    let mut symbols = PtxSymbols::default();

    let mut extern_decl = false;
    let mut tokens = body.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        match tok {
            ".extern" => extern_decl = true,
            ".entry" => {
                if let Some(next) = tokens.peek() {
                    let name = next.split('(').next().unwrap_or("");
                    if !extern_decl && !name.is_empty() {
                        symbols.entries.push(name.to_string());
                    }
                }
                extern_decl = false;
            }
            t if t.ends_with(';') || t.contains('{') || t.contains('}') => extern_decl = false,
            _ => {}
        }
    }

    for chunk in body.split(';') {
        // The initializer may itself hold braces, so cut it first.
        let decl = chunk.split('=').next().unwrap_or(chunk);
        let decl = decl.rsplit(&['{', '}'][..]).next().unwrap_or(decl);
        if let Some(global) = parse_global(decl) {
            symbols.globals.push(global);
        }
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
// Generated by hand
.version 7.0
.target sm_70
.address_size 64

.visible .global .align 4 .f32 scale = 2.0;
.global .align 8 .u64 table[4][2];
.extern .global .b8 shared_blob[];

.extern .func helper(.param .u32 x);

.visible .entry add(
    .param .u64 a,
    .param .u64 b
)
{
    ld.global.f32 %f1, [a];
    ret;
}

/* .entry commented_out( */
.entry scale_by (.param .u64 p)
{
    ret;
}
"#;

    #[test]
    fn finds_entries_and_globals() {
        let sym = parse(SAMPLE);
        assert_eq!(sym.entries, vec!["add".to_string(), "scale_by".to_string()]);
        assert_eq!(
            sym.globals,
            vec![("scale".to_string(), 4), ("table".to_string(), 64)]
        );
    }

    #[test]
    fn initialized_arrays_and_constants_are_globals() {
        let text = ".version 7.0\n.target sm_70\n\
            .visible .global .align 4 .u32 lut[4] = {1, 2, 3, 4};\n\
            .visible .const .align 4 .f32 coeff;\n\
            .const .align 8 .b8 weights[3][8] = {{0}, {0}, {0}};\n\
            .entry k() { ret; }\n";
        let sym = parse(text);
        assert_eq!(
            sym.globals,
            vec![
                ("lut".to_string(), 16),
                ("coeff".to_string(), 4),
                ("weights".to_string(), 24),
            ]
        );
        assert_eq!(sym.entries, vec!["k".to_string()]);
    }

    #[test]
    fn validation_requires_header_and_balanced_braces() {
        assert!(is_valid(SAMPLE));
        assert!(!is_valid(".target sm_70\n.entry k() { ret; }"));
        assert!(!is_valid(".version 7.0\n.target sm_70\n.entry k() { ret;"));
        assert!(!is_valid("\x7fELF garbage"));
    }

    #[test]
    fn type_sizes() {
        assert_eq!(type_size(".u8"), Some(1));
        assert_eq!(type_size(".f64"), Some(8));
        assert_eq!(type_size(".b16"), Some(2));
        assert_eq!(type_size(".align"), None);
        assert_eq!(type_size(".global"), None);
    }
}
