//! Field-by-field contents merge
//!
//! Incoming tree fragments carry only the fields a peer chose to send; a
//! merge overwrites exactly the populated fields and reports whether any
//! observable state changed so callers can decide to notify subscribers.

/// Merge every listed `Option` field of `$src` into `$dst`, returning `true`
/// when at least one field changed value.
macro_rules! merge_option_fields {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {{
        let mut changed = false;
        $(
            if $src.$field.is_some() && $dst.$field != $src.$field {
                $dst.$field = $src.$field.clone();
                changed = true;
            }
        )+
        changed
    }};
}
