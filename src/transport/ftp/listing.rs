//! Parser for Unix-style `LIST` output lines.
//!
//! Used when a server rejects `SIZE`: the listing still tells whether a path
//! exists, whether it is a directory, and how large it is. Listing dates are
//! too coarse to compare and are ignored.

/// Permission bits parsed from a `drwxr-xr-x` style column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    bits: u16,
    is_dir: bool,
}

impl Permissions {
    /// Parse a ten character mode column (`-rw-r--r--`, `drwxr-x---`, ...).
    #[must_use]
    pub fn parse(mode: &str) -> Option<Self> {
        let bytes = mode.as_bytes();
        if bytes.len() != 10 {
            return None;
        }

        let is_dir = match bytes[0] {
            b'd' => true,
            b'-' | b'l' | b'c' | b'b' | b'p' | b's' => false,
            _ => return None,
        };

        let mut bits = 0u16;
        for (i, expected) in [b'r', b'w', b'x', b'r', b'w', b'x', b'r', b'w', b'x']
            .iter()
            .enumerate()
        {
            let c = bytes[i + 1];
            let set = match c {
                b'-' => false,
                // setuid/setgid/sticky variants imply the execute slot
                b's' | b't' if *expected == b'x' => true,
                b'S' | b'T' if *expected == b'x' => false,
                _ if c == *expected => true,
                _ => return None,
            };
            if set {
                bits |= 1 << (8 - i);
            }
        }

        Some(Self { bits, is_dir })
    }

    #[must_use]
    pub fn mode(&self) -> u16 {
        self.bits
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    #[must_use]
    pub fn user_can_write(&self) -> bool {
        self.bits & 0o200 != 0
    }
}

impl std::fmt::Display for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::with_capacity(10);
        out.push(if self.is_dir { 'd' } else { '-' });
        for (i, c) in ['r', 'w', 'x', 'r', 'w', 'x', 'r', 'w', 'x'].iter().enumerate() {
            out.push(if self.bits & (1 << (8 - i)) != 0 { *c } else { '-' });
        }
        f.write_str(&out)
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub permissions: Permissions,
    pub size_bytes: u64,
}

impl ListingEntry {
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.permissions.is_dir()
    }
}

/// Parse one `ls -l` style line, e.g.
/// `-rw-r--r--   1 backup backup     1024 Mar 14 09:26 notes.txt`.
///
/// Returns `None` for `total N` headers and formats this parser does not
/// understand.
#[must_use]
pub fn parse_line(line: &str) -> Option<ListingEntry> {
    let mut rest = line.trim_end_matches(['\r', '\n']);
    let mut fields: Vec<&str> = Vec::with_capacity(8);

    // mode, links, owner, group, size, month, day, time-or-year
    while fields.len() < 8 {
        rest = rest.trim_start();
        if rest.is_empty() {
            return None;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        fields.push(&rest[..end]);
        rest = &rest[end..];
    }

    let permissions = Permissions::parse(fields[0])?;
    let size_bytes = fields[4].parse::<u64>().ok()?;

    // Exactly one separator precedes the name; names may contain spaces.
    let name = rest.strip_prefix(' ').unwrap_or(rest).trim_start();
    let name = match name.split_once(" -> ") {
        Some((link_name, _)) if fields[0].starts_with('l') => link_name,
        _ => name,
    };
    if name.is_empty() {
        return None;
    }

    Some(ListingEntry {
        name: name.to_string(),
        permissions,
        size_bytes,
    })
}

/// Find the listing entry for `name` among raw `LIST` lines.
#[must_use]
pub fn find_entry(lines: &[String], name: &str) -> Option<ListingEntry> {
    lines
        .iter()
        .filter_map(|line| parse_line(line))
        .find(|entry| entry.name == name || entry.name.rsplit('/').next() == Some(name))
}
