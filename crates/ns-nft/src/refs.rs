use crate::state::TableState;
use ns_core::{NftError, Result};

/// Check the `@set`/`@map`/`@flowtable` and `jump`/`goto` references in a rule body or
/// map value against the objects that currently exist in `table`.
///
/// This is a word-level scan, not a parse of the rule grammar: quoted strings that happen
/// to contain `@name` or `jump x` are checked too.
pub fn check_references(table: &TableState, body: &str) -> Result<()> {
    let words: Vec<&str> = body.split_whitespace().collect();

    for (i, word) in words.iter().enumerate() {
        let prev = i.checked_sub(1).map(|p| words[p]);

        if let Some(name) = word.strip_prefix('@') {
            // `@a, @b` is a list of literals, not a lookup
            if name.is_empty() || name.ends_with(',') {
                continue;
            }
            match prev {
                Some("map") | Some("vmap") => {
                    if !table.maps.contains_key(name) {
                        return Err(NftError::not_found(format!("no such map {:?}", name)));
                    }
                }
                Some("offload") => {
                    if !table.flowtables.contains_key(name) {
                        return Err(NftError::not_found(format!("no such flowtable {:?}", name)));
                    }
                }
                _ => {
                    if !table.sets.contains_key(name) && !table.maps.contains_key(name) {
                        return Err(NftError::not_found(format!("no such set/map {:?}", name)));
                    }
                }
            }
            continue;
        }

        if (*word == "jump" || *word == "goto") && i + 1 < words.len() {
            let chain = words[i + 1].trim_end_matches(',');
            if !table.chains.contains_key(chain) {
                return Err(NftError::not_found(format!("no such chain {:?}", chain)));
            }
        }
    }

    Ok(())
}
