//! Catalog filter model: facet definitions, faceted matching and the
//! per-option product index.
//!
//! A filter row hangs off exactly one subcatalog or category and holds an
//! ordered list of [`Facet`]s. Facets with options (`radio`, `checkbox`)
//! carry, per option, the IDs of the products tagged with that option's
//! slug. Product tags are the source of truth; the option index is derived
//! from them with [`reconcile_product`] / [`rebuild_option_index`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter data must contain at least one facet")]
    EmptyData,
    #[error("exactly one of subcatalog_id or category_id is required")]
    AmbiguousTarget,
    #[error("options must be a JSON array of strings: {0}")]
    MalformedOptions(String),
    #[error("facet '{0}' already exists")]
    DuplicateFacet(String),
    #[error("facet '{0}' not found")]
    FacetNotFound(String),
    #[error("invalid facet: {0}")]
    InvalidFacet(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacetKind {
    Radio,
    Checkbox,
    Price,
    Brand,
}

impl FacetKind {
    /// Price and brand facets match on product columns and carry no options.
    #[must_use]
    pub fn has_options(self) -> bool {
        matches!(self, FacetKind::Radio | FacetKind::Checkbox)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetOption {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub products_id: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FacetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub options: Vec<FacetOption>,
}

/// The node a filter row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTarget {
    Subcatalog(i64),
    Category(i64),
}

impl FilterTarget {
    /// Build a target from the two mutually exclusive foreign keys.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::AmbiguousTarget`] unless exactly one is set.
    pub fn from_ids(subcatalog_id: Option<i64>, category_id: Option<i64>) -> Result<Self, FilterError> {
        match (subcatalog_id, category_id) {
            (Some(id), None) => Ok(FilterTarget::Subcatalog(id)),
            (None, Some(id)) => Ok(FilterTarget::Category(id)),
            _ => Err(FilterError::AmbiguousTarget),
        }
    }

    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            FilterTarget::Subcatalog(id) | FilterTarget::Category(id) => id,
        }
    }
}

/// A hierarchy node addressed by slug in a public query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSlug<'a> {
    Subcatalog(&'a str),
    Category(&'a str),
}

/// Pick the node to filter on. Category wins when both are given; blank
/// values count as absent.
#[must_use]
pub fn select_node<'a>(subcatalog: Option<&'a str>, category: Option<&'a str>) -> Option<NodeSlug<'a>> {
    let non_blank = |s: &'a str| Some(s.trim()).filter(|s| !s.is_empty());
    if let Some(slug) = category.and_then(non_blank) {
        return Some(NodeSlug::Category(slug));
    }
    subcatalog.and_then(non_blank).map(NodeSlug::Subcatalog)
}

/// A product's ID together with the tag array relevant to the current scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedProduct {
    pub id: i64,
    pub tags: Vec<String>,
}

/// Parse the serialized `options` query parameter.
///
/// Absent or blank input means "nothing selected". Duplicates are dropped,
/// first occurrence wins.
///
/// # Errors
///
/// Returns [`FilterError::MalformedOptions`] if the value is not a JSON array
/// of strings.
pub fn parse_selected_options(raw: Option<&str>) -> Result<Vec<String>, FilterError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };

    let parsed: Vec<String> =
        serde_json::from_str(raw).map_err(|e| FilterError::MalformedOptions(e.to_string()))?;

    let mut seen = HashSet::new();
    Ok(parsed
        .into_iter()
        .filter(|slug| !slug.is_empty() && seen.insert(slug.clone()))
        .collect())
}

/// OR semantics across every selected slug, regardless of which facet it
/// belongs to. An empty selection matches everything.
#[must_use]
pub fn product_matches(tags: &[String], selected: &[String]) -> bool {
    selected.is_empty() || selected.iter().any(|s| tags.contains(s))
}

/// IDs of the products matching `selected`, in input order.
#[must_use]
pub fn matching_product_ids(products: &[TaggedProduct], selected: &[String]) -> Vec<i64> {
    products
        .iter()
        .filter(|p| product_matches(&p.tags, selected))
        .map(|p| p.id)
        .collect()
}

/// Client-facing facet: option ID lists replaced by counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetView {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FacetKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub options: Vec<FacetOptionView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetOptionView {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub product_count: usize,
}

/// Strip option ID lists, counting only IDs present in `visible`.
#[must_use]
pub fn facet_views(data: &[Facet], visible: &HashSet<i64>) -> Vec<FacetView> {
    data.iter()
        .map(|facet| FacetView {
            name: facet.name.clone(),
            kind: facet.kind,
            title: facet.title.clone(),
            options: facet
                .options
                .iter()
                .map(|option| FacetOptionView {
                    name: option.name.clone(),
                    title: option.title.clone(),
                    product_count: option
                        .products_id
                        .iter()
                        .filter(|id| visible.contains(id))
                        .count(),
                })
                .collect(),
        })
        .collect()
}

/// Structural checks on admin-supplied facets.
///
/// # Errors
///
/// Returns [`FilterError::InvalidFacet`] for blank names, options on an
/// optionless kind, or repeated option names, and
/// [`FilterError::DuplicateFacet`] when two facets share a name.
pub fn validate_facets(data: &[Facet]) -> Result<(), FilterError> {
    let mut names = HashSet::new();
    for facet in data {
        if facet.name.trim().is_empty() {
            return Err(FilterError::InvalidFacet("facet name must be non-empty".into()));
        }
        if !names.insert(facet.name.as_str()) {
            return Err(FilterError::DuplicateFacet(facet.name.clone()));
        }
        if !facet.kind.has_options() && !facet.options.is_empty() {
            return Err(FilterError::InvalidFacet(format!(
                "facet '{}' of this type cannot have options",
                facet.name
            )));
        }

        let mut option_names = HashSet::new();
        for option in &facet.options {
            if option.name.trim().is_empty() {
                return Err(FilterError::InvalidFacet(format!(
                    "facet '{}' has an option with an empty name",
                    facet.name
                )));
            }
            if !option_names.insert(option.name.as_str()) {
                return Err(FilterError::InvalidFacet(format!(
                    "facet '{}' repeats option '{}'",
                    facet.name, option.name
                )));
            }
        }
    }
    Ok(())
}

/// Append `incoming` to `existing`, refusing any name already present.
///
/// Option ID lists supplied by the caller are discarded; the index is
/// rebuilt from product tags afterwards.
///
/// # Errors
///
/// Returns [`FilterError::EmptyData`] when `incoming` is empty,
/// [`FilterError::DuplicateFacet`] on a name collision, or any
/// [`validate_facets`] error.
pub fn merge_facets(existing: &mut Vec<Facet>, mut incoming: Vec<Facet>) -> Result<(), FilterError> {
    if incoming.is_empty() {
        return Err(FilterError::EmptyData);
    }
    validate_facets(&incoming)?;

    if let Some(clash) = incoming
        .iter()
        .find(|f| existing.iter().any(|e| e.name == f.name))
    {
        return Err(FilterError::DuplicateFacet(clash.name.clone()));
    }

    for facet in &mut incoming {
        for option in &mut facet.options {
            option.products_id.clear();
        }
    }
    existing.extend(incoming);
    Ok(())
}

/// Replace the facet called `name` with `replacement`.
///
/// Options whose name survives keep their product list; new options start
/// empty. Keeping the same facet name is fine; renaming onto another
/// facet's name is not.
///
/// # Errors
///
/// Returns [`FilterError::FacetNotFound`] if `name` is absent,
/// [`FilterError::DuplicateFacet`] on a rename collision, or any
/// [`validate_facets`] error.
pub fn replace_facet(data: &mut [Facet], name: &str, mut replacement: Facet) -> Result<(), FilterError> {
    validate_facets(std::slice::from_ref(&replacement))?;

    let idx = data
        .iter()
        .position(|f| f.name == name)
        .ok_or_else(|| FilterError::FacetNotFound(name.to_string()))?;

    if replacement.name != name && data.iter().any(|f| f.name == replacement.name) {
        return Err(FilterError::DuplicateFacet(replacement.name));
    }

    let previous = &data[idx];
    for option in &mut replacement.options {
        option.products_id = previous
            .options
            .iter()
            .find(|old| old.name == option.name)
            .map(|old| old.products_id.clone())
            .unwrap_or_default();
    }

    data[idx] = replacement;
    Ok(())
}

/// Remove and return the facet called `name`.
///
/// # Errors
///
/// Returns [`FilterError::FacetNotFound`] if no facet has that name.
pub fn remove_facet(data: &mut Vec<Facet>, name: &str) -> Result<Facet, FilterError> {
    let idx = data
        .iter()
        .position(|f| f.name == name)
        .ok_or_else(|| FilterError::FacetNotFound(name.to_string()))?;
    Ok(data.remove(idx))
}

/// Bring one product's entries in the option index in line with its tags.
///
/// Pass empty `tags` to drop the product everywhere (deleted or moved to
/// another node). Returns `true` if anything changed.
pub fn reconcile_product(data: &mut [Facet], product_id: i64, tags: &[String]) -> bool {
    let mut changed = false;
    for option in data.iter_mut().flat_map(|f| f.options.iter_mut()) {
        let wanted = tags.contains(&option.name);
        let present = option.products_id.contains(&product_id);
        if wanted && !present {
            option.products_id.push(product_id);
            option.products_id.sort_unstable();
            changed = true;
        } else if !wanted && present {
            option.products_id.retain(|id| *id != product_id);
            changed = true;
        }
    }
    changed
}

/// Recompute every option's product list from scratch.
pub fn rebuild_option_index(data: &mut [Facet], products: &[TaggedProduct]) {
    for option in data.iter_mut().flat_map(|f| f.options.iter_mut()) {
        option.products_id = products
            .iter()
            .filter(|p| p.tags.contains(&option.name))
            .map(|p| p.id)
            .collect();
        option.products_id.sort_unstable();
        option.products_id.dedup();
    }
}

#[cfg(test)]
#[path = "facets_test.rs"]
mod tests;
