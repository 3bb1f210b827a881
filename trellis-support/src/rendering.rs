//! Text rendering utilities for human-friendly diagnostics.
//!
//! Provides helpers to format dependency cycles, key lists, type names,
//! and "did you mean?" suggestions in error output.

/// Renders a dependency cycle, closing it back on its first element.
///
/// # Examples
/// ```
/// use trellis_support::rendering::render_cycle;
///
/// let cycle = vec!["Teller", "Ledger"];
/// assert_eq!(render_cycle(&cycle), "Teller → Ledger → Teller");
/// ```
pub fn render_cycle(cycle: &[impl AsRef<str>]) -> String {
    let Some(first) = cycle.first() else {
        return String::new();
    };

    let mut rendered = cycle
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(" → ");
    rendered.push_str(" → ");
    rendered.push_str(first.as_ref());
    rendered
}

/// Renders items as an indented bullet list, one per line.
///
/// ```
/// use trellis_support::rendering::render_bullets;
///
/// assert_eq!(render_bullets(&["a", "b"], 4), "\n    - a\n    - b");
/// ```
pub fn render_bullets(items: &[impl AsRef<str>], indent: usize) -> String {
    let pad = " ".repeat(indent);
    items
        .iter()
        .map(|item| format!("\n{pad}- {}", item.as_ref()))
        .collect()
}

/// Shortens a fully qualified type name for display.
///
/// Every path inside the name is reduced to its last segment, generic
/// arguments included.
///
/// ```
/// use trellis_support::rendering::shorten_type_name;
///
/// assert_eq!(shorten_type_name("bank::atm::Database"), "Database");
/// assert_eq!(
///     shorten_type_name("alloc::sync::Arc<dyn bank::Outbox>"),
///     "Arc<dyn Outbox>"
/// );
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut out = String::with_capacity(full_name.len());
    let mut segment_start = 0;

    for (idx, ch) in full_name.char_indices() {
        match ch {
            ':' => {
                // `::` drops everything written since the last delimiter
                if full_name[idx + 1..].starts_with(':') {
                    out.truncate(segment_start);
                } else if idx > 0 && full_name[..idx].ends_with(':') {
                    continue;
                } else {
                    out.push(ch);
                }
            }
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&' | ';' => {
                out.push(ch);
                segment_start = out.len();
            }
            _ => out.push(ch),
        }
    }

    out
}

/// Levenshtein edit distance between two strings, counted in chars.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b_chars.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let above = row[j + 1];
            let substitution = diagonal + usize::from(ca != *cb);
            row[j + 1] = substitution.min(above + 1).min(row[j] + 1);
            diagonal = above;
        }
    }

    row[b_chars.len()]
}

/// Picks the candidates that look like a misspelling of `requested`.
///
/// Matching is done on shortened, lowercased names. Substring matches rank
/// first, then candidates within an edit distance of a third of the
/// requested name's length. Ties keep the candidates' original order.
///
/// ```
/// use trellis_support::rendering::suggest_similar;
///
/// let available = ["bank::Database", "bank::Outbox", "bank::Dashboard"];
/// let found = suggest_similar("bank::Databse", &available, 2);
/// assert_eq!(found, vec!["bank::Database"]);
/// ```
pub fn suggest_similar(
    requested: &str,
    available: &[impl AsRef<str>],
    max_suggestions: usize,
) -> Vec<String> {
    let wanted = shorten_type_name(requested).to_lowercase();
    let budget = (wanted.chars().count() / 3).max(1);

    let mut scored: Vec<(usize, &str)> = available
        .iter()
        .map(|name| name.as_ref())
        .filter(|name| *name != requested)
        .filter_map(|name| {
            let short = shorten_type_name(name).to_lowercase();
            if short.contains(&wanted) || wanted.contains(&short) {
                return Some((0, name));
            }
            let distance = edit_distance(&wanted, &short);
            (distance <= budget).then_some((distance, name))
        })
        .collect();

    scored.sort_by_key(|(score, _)| *score);
    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(_, name)| name.to_string())
        .collect()
}
