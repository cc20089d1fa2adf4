//! Username allocation within a topic.

/// Separator between a base username and its numeric suffix.
pub const SUFFIX_SEPARATOR: char = '#';

/// Return `desired` if it is free, otherwise the first free `desired#n` for
/// `n` counting up from 2.
///
/// The caller must hold the topic exclusively between this call and inserting
/// the member, otherwise two joins can be handed the same name.
pub fn allocate_username<F>(desired: &str, is_taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    if !is_taken(desired) {
        return desired.to_string();
    }

    let mut suffix: u64 = 2;
    loop {
        let candidate = format!("{desired}{SUFFIX_SEPARATOR}{suffix}");
        if !is_taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
