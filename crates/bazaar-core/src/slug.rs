//! URL slugs for catalog nodes and products.

use std::sync::LazyLock;

use regex::Regex;

static SLUG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[.\-][a-z0-9]+)*$").expect("slug regex is valid")
});

/// Generate a URL-safe slug from a display title.
///
/// Cyrillic letters are transliterated; anything else outside `[a-z0-9-]`
/// is dropped and whitespace runs collapse into a single `-`.
#[must_use]
pub fn slug_from_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
        } else if c.is_whitespace() || c == '_' {
            out.push('-');
        } else if let Some(latin) = transliterate(c) {
            out.push_str(latin);
        }
    }

    out.split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Returns `true` when `slug` is a valid client-supplied slug.
///
/// Dots are allowed between segments so coded slugs like `0101.telefony`
/// pass.
#[must_use]
pub fn is_valid_slug(slug: &str) -> bool {
    slug.len() <= 200 && SLUG_RE.is_match(slug)
}

fn transliterate(c: char) -> Option<&'static str> {
    let latin = match c {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' | 'э' => "e",
        'ё' => "yo",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'й' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "h",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "sch",
        'ы' => "y",
        'ю' => "yu",
        'я' => "ya",
        'ў' => "o",
        'қ' => "q",
        'ғ' => "g",
        'ҳ' => "h",
        'ъ' | 'ь' => "",
        _ => return None,
    };
    Some(latin)
}
