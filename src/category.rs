//! Category resolution against the catalog, and the keyword tables that map a
//! detected garment type to a top-level category and size taxonomy.
use crate::commerce::model::NewCategory;
use crate::commerce::CommerceApi;
use crate::model::SizeType;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const UPPER_BODY: &str = "Üst Giyim";
pub const LOWER_BODY: &str = "Alt Giyim";
pub const ACCESSORY: &str = "Aksesuar";

// Checked first: "tişört" contains "şort".
const UPPER_BODY_KEYWORDS: &[&str] = &[
    "tişört", "tisort", "t-shirt", "tshirt", "gömlek", "gomlek", "polo", "kazak",
    "hirka", "ceket", "mont", "kaban", "yelek", "sweatshirt", "shirt", "jacket", "coat", "sweater",
];

const LOWER_BODY_KEYWORDS: &[&str] = &[
    "pantolon", "jean", "kot", "şort", "sort", "etek", "chino", "eşofman alt", "tayt",
    "trousers", "pants", "shorts", "skirt",
];

const ACCESSORY_KEYWORDS: &[&str] = &[
    "çanta", "canta", "kemer", "şapka", "sapka", "cüzdan", "cuzdan", "atki", "bere",
    "eldiven", "saat", "gözlük", "gozluk", "kravat", "çorap", "corap", "bag", "belt", "hat",
    "cap", "wallet", "scarf", "watch", "sunglasses", "socks",
];

const NUMERIC_SIZE_KEYWORDS: &[&str] = &[
    "pantolon", "jean", "kot", "chino", "trousers", "pants",
];

const STANDARD_SIZE_KEYWORDS: &[&str] = &[
    "çanta", "canta", "kemer", "şapka", "sapka", "cüzdan", "cuzdan", "atki", "bere",
    "saat", "gözlük", "gozluk", "kravat", "bag", "belt", "hat", "cap", "wallet", "scarf",
    "watch", "sunglasses",
];

/// Lowercase with the Turkish dotted/dotless I collapsed onto `i`, so that
/// "GİYİM", "GIYIM" and "giyim" compare equal.
pub fn fold_case(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'İ' | 'I' | 'ı' => 'i',
            other => other,
        })
        .flat_map(char::to_lowercase)
        .collect()
}

fn fold_ascii(c: char) -> Option<char> {
    let folded = match c {
        'ç' | 'Ç' => 'c',
        'ğ' | 'Ğ' => 'g',
        'ı' | 'İ' | 'I' => 'i',
        'ö' | 'Ö' => 'o',
        'ş' | 'Ş' => 's',
        'ü' | 'Ü' => 'u',
        'â' | 'Â' => 'a',
        'î' | 'Î' => 'i',
        'û' | 'Û' => 'u',
        c if c.is_ascii_alphanumeric() => c.to_ascii_lowercase(),
        _ => return None,
    };
    Some(folded)
}

/// URL slug: Turkish letters folded to ASCII, lowercase, every other run of
/// characters collapsed to a single `-`, no leading or trailing `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        match fold_ascii(c) {
            Some(c) => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c);
            }
            None => pending_dash = true,
        }
    }
    slug
}

fn matches_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(k))
}

/// One of the three top-level categories for a detected product type; upper body by default.
pub fn top_level_category(product_type: &str) -> &'static str {
    let folded = fold_case(product_type);
    if matches_any(&folded, UPPER_BODY_KEYWORDS) {
        UPPER_BODY
    } else if matches_any(&folded, LOWER_BODY_KEYWORDS) {
        LOWER_BODY
    } else if matches_any(&folded, ACCESSORY_KEYWORDS) {
        ACCESSORY
    } else {
        UPPER_BODY
    }
}

/// Size taxonomy for a detected product type; letter sizes by default.
pub fn size_type_for(product_type: &str) -> SizeType {
    let folded = fold_case(product_type);
    if matches_any(&folded, NUMERIC_SIZE_KEYWORDS) {
        SizeType::Numeric
    } else if matches_any(&folded, STANDARD_SIZE_KEYWORDS) {
        SizeType::Standard
    } else {
        SizeType::Letter
    }
}

/// Maps free-text category names onto catalog ids, creating categories on demand.
#[derive(Clone)]
pub struct CategoryResolver {
    commerce: Arc<dyn CommerceApi>,
}

impl CategoryResolver {
    pub fn new(commerce: Arc<dyn CommerceApi>) -> Self {
        Self { commerce }
    }

    /// Category id for `name`, or `None` when it neither exists nor could be created.
    #[instrument(skip_all, fields(name))]
    pub async fn resolve(&self, name: &str) -> Option<String> {
        let target = fold_case(name.trim());
        if target.is_empty() {
            return None;
        }

        match self.commerce.list_categories().await {
            Ok(categories) => {
                let found = categories.into_iter().find(|c| {
                    let candidate = fold_case(c.name.trim());
                    !candidate.is_empty()
                        && (candidate == target
                            || candidate.contains(&target)
                            || target.contains(&candidate))
                });
                if let Some(category) = found {
                    return Some(category.id);
                }
            }
            Err(err) => warn!(?err, "failed to list categories; will try to create"),
        }

        let slug = slugify(name);
        if slug.is_empty() {
            warn!(name, "category name has no sluggable characters");
            return None;
        }
        let new = NewCategory {
            name: name.trim().to_string(),
            slug,
        };
        match self.commerce.create_category(&new).await {
            Ok(created) => {
                info!(id = %created.id, slug = %new.slug, "created category");
                Some(created.id)
            }
            Err(err) => {
                warn!(?err, name, "failed to create category");
                None
            }
        }
    }
}
