//! Initial Spanish labels for technical column names.
//!
//! The labels are a starting suggestion for the human curator, produced by
//! an ordered substitution table followed by title casing. Order is
//! semantic: narrow suffix rules run before the broad ones, and each rule
//! operates on the output of the previous.

use regex::Regex;
use std::sync::OnceLock;

/// Pre-compiled substitution rules, applied in declaration order.
///
/// Uses `OnceLock` for thread-safe lazy initialization.
struct LabelRules {
    rules: Vec<(Regex, &'static str)>,
}

impl LabelRules {
    fn instance() -> &'static Self {
        static RULES: OnceLock<LabelRules> = OnceLock::new();
        RULES.get_or_init(Self::compile)
    }

    fn compile() -> Self {
        // The first two rules require a non-word character (or start of
        // input) before the suffix, so `grid` and `_id` are left for the
        // later rules; the captured boundary is preserved in the output.
        let table: [(&str, &str); 14] = [
            (r"(^|[^\w])id$", "${1}Identificador"),
            (r"(^|[^\w])pk$", "${1}Llave Primaria"),
            (r"_id$", " de Identificador"),
            (r"^id_", "Identificador de "),
            (r"created_at$", "Fecha de Creación"),
            (r"updated_at$", "Fecha de Actualización"),
            (r"softdeleted$", "Estado de Eliminación (Lógica)"),
            (r"dni$", "DNI"),
            (r"rut$", "RUT"),
            (r"tel$", "Teléfono"),
            (r"state$", "Estado"),
            (r"status$", "Estado"),
            (r"name$", "Nombre"),
            (r"desc$", "Descripción"),
        ];

        let rules = table
            .into_iter()
            .map(|(pattern, replacement)| {
                (
                    Regex::new(pattern).expect("Invalid label rule pattern"),
                    replacement,
                )
            })
            .collect();

        Self { rules }
    }
}

/// Produces the initial human-readable label for a column name.
///
/// Pure: same input, same output, no I/O.
///
/// # Example
///
/// ```rust
/// use dbcurator_core::humanize::humanize_column;
///
/// assert_eq!(humanize_column("created_at"), "Fecha De Creación");
/// assert_eq!(humanize_column("id"), "Identificador");
/// ```
#[must_use]
pub fn humanize_column(column: &str) -> String {
    let mut name = column.trim().to_lowercase();

    for (pattern, replacement) in &LabelRules::instance().rules {
        if let std::borrow::Cow::Owned(replaced) = pattern.replace_all(&name, *replacement) {
            name = replaced;
        }
    }

    title_case(&name.replace('_', " ")).trim().to_string()
}

/// Uppercases the first letter of every word and lowercases the rest.
///
/// A word starts after any non-letter, so parenthesized fragments keep
/// their leading capital.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;

    for ch in text.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_columns() {
        assert_eq!(humanize_column("created_at"), "Fecha De Creación");
        assert_eq!(humanize_column("updated_at"), "Fecha De Actualización");
    }

    #[test]
    fn test_bare_id_and_pk() {
        assert_eq!(humanize_column("id"), "Identificador");
        assert_eq!(humanize_column("pk"), "Llave Primaria");
    }

    #[test]
    fn test_id_suffix_keeps_subject() {
        let label = humanize_column("user_id");
        assert!(label.contains("Identificador"), "got: {label}");
        assert!(label.starts_with("User"), "got: {label}");
    }

    #[test]
    fn test_id_prefix() {
        let label = humanize_column("id_cliente");
        assert!(label.starts_with("Identificador De"), "got: {label}");
    }

    #[test]
    fn test_embedded_id_is_not_rewritten() {
        // 'grid' ends in "id" but the preceding char is a word character.
        assert_eq!(humanize_column("grid"), "Grid");
    }

    #[test]
    fn test_domain_suffixes() {
        assert_eq!(humanize_column("client_dni"), "Client Dni");
        assert_eq!(humanize_column("status"), "Estado");
        assert_eq!(humanize_column("full_name"), "Full Nombre");
        assert_eq!(
            humanize_column("softdeleted"),
            "Estado De Eliminación (Lógica)"
        );
    }

    #[test]
    fn test_trims_and_lowercases_input() {
        assert_eq!(humanize_column("  CREATED_AT  "), "Fecha De Creación");
    }

    #[test]
    fn test_unknown_names_are_title_cased() {
        assert_eq!(humanize_column("numero_factura"), "Numero Factura");
    }
}
