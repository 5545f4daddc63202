//! Identifier helpers shared by type, key and ownership inference.

use std::collections::BTreeSet;

/// Trailing table-name tokens that only mark a table's role (`date_dim`).
const ROLE_SUFFIXES: &[&str] = &["dim", "dimension", "fact", "tbl", "table"];

/// Split an identifier on camel-case and non-alphanumeric boundaries.
///
/// `customerId` → `[customer, id]`, `ss_sold_date_sk` → `[ss, sold, date, sk]`.
pub fn tokenize(identifier: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in identifier.chars() {
        if !c.is_ascii_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_ascii_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        current.push(c.to_ascii_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Crude English singularization, good enough for table names.
pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    if word.ends_with("sses") || word.ends_with("xes") || word.ends_with("ches") {
        return word[..word.len() - 2].to_string();
    }
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

/// Surrogate-key shaped column names: `*_sk`, `*_id`, or exactly `id`.
pub fn is_key_like(column: &str) -> bool {
    let column = column.to_ascii_lowercase();
    column == "id" || column.ends_with("_sk") || column.ends_with("_id")
}

/// The column name without its `_sk` / `_id` key suffix.
pub fn key_stem(column: &str) -> &str {
    column
        .strip_suffix("_sk")
        .or_else(|| column.strip_suffix("_id"))
        .unwrap_or(column)
}

/// Every spelling a column prefix may use to point at `table`:
/// the name itself, its singular form, the name without underscores, the
/// first-letter abbreviation (`store_sales` → `ss`) and the name without a
/// trailing role token (`date_dim` → `date`).
pub fn name_variants(table: &str) -> BTreeSet<String> {
    let tokens = tokenize(table);
    let mut variants = BTreeSet::new();
    if tokens.is_empty() {
        return variants;
    }

    let singular: Vec<String> = tokens.iter().map(|t| singularize(t)).collect();
    variants.insert(tokens.join("_"));
    variants.insert(singular.join("_"));
    variants.insert(tokens.concat());
    variants.insert(singular.concat());

    let abbreviation: String = tokens.iter().filter_map(|t| t.chars().next()).collect();
    variants.insert(abbreviation);

    if tokens.len() > 1 {
        if let Some(last) = tokens.last() {
            if ROLE_SUFFIXES.contains(&last.as_str()) {
                let head = &singular[..singular.len() - 1];
                variants.insert(head.join("_"));
            }
        }
    }
    variants
}

/// Singular form of a table name's final token (`customer_address` → `address`).
pub fn last_name_token(table: &str) -> Option<String> {
    tokenize(table).last().map(|t| singularize(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_camel_and_snake_case() {
        assert_eq!(tokenize("customerId"), vec!["customer", "id"]);
        assert_eq!(tokenize("ss_sold_date_sk"), vec!["ss", "sold", "date", "sk"]);
        assert_eq!(tokenize("HTTPStatus"), vec!["httpstatus"]);
        assert_eq!(tokenize("order-Total2"), vec!["order", "total2"]);
    }

    #[test]
    fn key_like_detection() {
        assert!(is_key_like("id"));
        assert!(is_key_like("c_customer_sk"));
        assert!(is_key_like("customer_id"));
        assert!(!is_key_like("idle"));
        assert!(!is_key_like("paid"));
    }

    #[test]
    fn variants_cover_abbreviations_and_role_suffixes() {
        let v = name_variants("store_sales");
        assert!(v.contains("ss"));
        assert!(v.contains("store_sale"));
        assert!(v.contains("storesales"));

        let v = name_variants("date_dim");
        assert!(v.contains("date"));
        assert!(v.contains("dd"));

        let v = name_variants("customers");
        assert!(v.contains("customer"));
        assert!(v.contains("c"));
    }

    #[test]
    fn singularizes_common_plurals() {
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("addresses"), "address");
        assert_eq!(singularize("orders"), "order");
        assert_eq!(singularize("class"), "class");
    }
}
