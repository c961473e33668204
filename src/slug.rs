/// Turn a layer name into an identifier-safe slug.
///
/// Unicode is transliterated to ASCII, apostrophes are dropped, every other
/// run of non-alphanumeric characters becomes a single `_`, and separators are
/// trimmed from both ends. Case is preserved; callers lowercase first when
/// they need to.
pub fn slugify(name: &str) -> String {
    let ascii = deunicode::deunicode(name);
    let mut slug = String::with_capacity(ascii.len());
    let mut pending_separator = false;
    for ch in ascii.chars() {
        if ch == '\'' {
            continue;
        }
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(ch);
        } else {
            pending_separator = true;
        }
    }
    slug
}
