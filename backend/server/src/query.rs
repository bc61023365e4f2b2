//! # List Queries
//!
//! Everything `GET /{resource}` understands in its query string.
//!
//! | Parameter | Effect |
//! |---|---|
//! | `field=v` | keep records whose field stringifies to `v`, repeated keys OR together |
//! | `field_ne=v` | field differs from every `v` |
//! | `field_gte=v`, `field_lte=v` | range, numeric when the field is a number |
//! | `field_like=re` | case-insensitive regex match |
//! | `q=text` | substring search over every value |
//! | `_sort=a,b&_order=asc,desc` | multi-key stable ordering |
//! | `_page=n&_limit=m` | page of `m` (default 10) |
//! | `_start=i&_end=j` or `_start=i&_limit=m` | slice |
//! | `_embed=children` | attach child records pointing back by `<resource>Id` |
//! | `_expand=parent` | attach the parent record named by `<parent>Id` |
//!
//! Fields use dot paths (`author.name`). Plain equality keys that no record
//! has are dropped instead of filtering everything out.
use std::cmp::Ordering;

use regex::RegexBuilder;
use serde_json::Value;

use crate::{
    database::Document,
    error::AppError,
    utils::{foreign_key, id_matches, lookup, plural, stringify},
};

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
    Gte,
    Lte,
    Like,
}

#[derive(Debug, Clone)]
struct Filter {
    path: String,
    operator: Operator,
    values: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ListQuery {
    q: Option<String>,
    sort: Option<String>,
    order: Option<String>,
    start: Option<String>,
    end: Option<String>,
    limit: Option<String>,
    page: Option<String>,
    pub embed: Vec<String>,
    pub expand: Vec<String>,
    filters: Vec<Filter>,
    /// Added by nested routes, never pruned.
    forced: Vec<Filter>,
}

pub struct Listing {
    pub records: Vec<Value>,
    /// Pre-pagination count, present only when the request paginated.
    pub total: Option<usize>,
}

impl ListQuery {
    pub fn parse(pairs: Vec<(String, String)>) -> Self {
        let mut query = Self::default();

        for (key, value) in pairs {
            match key.as_str() {
                "q" => query.q = Some(value),
                "_sort" => query.sort = Some(value),
                "_order" => query.order = Some(value),
                "_start" => query.start = Some(value),
                "_end" => query.end = Some(value),
                "_limit" => query.limit = Some(value),
                "_page" => query.page = Some(value),
                "_embed" => query.embed.push(value),
                "_expand" => query.expand.push(value),
                "callback" | "_" => {}
                _ => query.push_filter(&key, value),
            }
        }

        query
    }

    /// Restricts the listing to records whose `field` equals `value`.
    pub fn require(&mut self, field: &str, value: &str) {
        self.forced.push(Filter {
            path: field.to_string(),
            operator: Operator::Eq,
            values: vec![value.to_string()],
        });
    }

    fn push_filter(&mut self, key: &str, value: String) {
        let (path, operator) = [
            ("_ne", Operator::Ne),
            ("_gte", Operator::Gte),
            ("_lte", Operator::Lte),
            ("_like", Operator::Like),
        ]
        .into_iter()
        .find_map(|(suffix, operator)| key.strip_suffix(suffix).map(|path| (path, operator)))
        .unwrap_or((key, Operator::Eq));

        match self
            .filters
            .iter_mut()
            .find(|filter| filter.path == path && filter.operator == operator)
        {
            Some(filter) => filter.values.push(value),
            None => self.filters.push(Filter {
                path: path.to_string(),
                operator,
                values: vec![value],
            }),
        }
    }

    fn paginates(&self) -> bool {
        [&self.page, &self.end, &self.limit]
            .into_iter()
            .any(|param| param.as_deref().is_some_and(|p| !p.is_empty()))
    }
}

pub fn list(
    document: &Document,
    resource: &str,
    records: &[Value],
    query: &ListQuery,
) -> Result<Listing, AppError> {
    let mut selected: Vec<&Value> = records.iter().collect();

    if let Some(q) = query.q.as_deref().filter(|q| !q.is_empty()) {
        let needle = q.to_lowercase();
        selected.retain(|record| match record {
            Value::Object(fields) => fields.values().any(|value| deep_contains(value, &needle)),
            _ => false,
        });
    }

    let active = query
        .filters
        .iter()
        .filter(|filter| {
            filter.operator != Operator::Eq
                || records.iter().any(|record| lookup(record, &filter.path).is_some())
        })
        .chain(&query.forced);

    for filter in active {
        let matcher = Matcher::new(filter)?;
        selected.retain(|record| matcher.matches(record));
    }

    if let Some(sort) = query.sort.as_deref().filter(|s| !s.is_empty()) {
        sort_records(&mut selected, sort, query.order.as_deref().unwrap_or(""));
    }

    let total = query.paginates().then_some(selected.len());
    let window = paginate(selected.len(), query);

    let records = selected[window.0..window.1]
        .iter()
        .map(|record| {
            let mut record = (*record).clone();
            attach_relations(document, resource, &mut record, &query.embed, &query.expand);
            record
        })
        .collect();

    Ok(Listing { records, total })
}

/// Adds `_embed` children and `_expand` parents onto one record.
pub fn attach_relations(
    document: &Document,
    resource: &str,
    record: &mut Value,
    embed: &[String],
    expand: &[String],
) {
    let Some(id) = record.get("id").cloned() else {
        return;
    };

    for child in embed {
        if let Some(Value::Array(children)) = document.get(child) {
            let key = foreign_key(resource);
            let matching = children
                .iter()
                .filter(|candidate| candidate.get(&key) == Some(&id))
                .cloned()
                .collect();

            if let Value::Object(fields) = record {
                fields.insert(child.clone(), Value::Array(matching));
            }
        }
    }

    for parent in expand {
        let Some(parent_id) = record.get(format!("{parent}Id")).map(stringify) else {
            continue;
        };

        if let Some(Value::Array(parents)) = document.get(&plural(parent)) {
            if let Some(found) = parents.iter().find(|p| id_matches(p, &parent_id)) {
                if let Value::Object(fields) = record {
                    fields.insert(parent.clone(), found.clone());
                }
            }
        }
    }
}

struct Matcher<'a> {
    filter: &'a Filter,
    patterns: Vec<regex::Regex>,
}

impl<'a> Matcher<'a> {
    fn new(filter: &'a Filter) -> Result<Self, AppError> {
        let patterns = if filter.operator == Operator::Like {
            filter
                .values
                .iter()
                .map(|pattern| {
                    RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| AppError::InvalidQuery(e.to_string()))
                })
                .collect::<Result<_, _>>()?
        } else {
            Vec::new()
        };

        Ok(Self { filter, patterns })
    }

    fn matches(&self, record: &Value) -> bool {
        let Some(field) = lookup(record, &self.filter.path).filter(|v| !v.is_null()) else {
            return false;
        };
        let text = stringify(field);

        match self.filter.operator {
            Operator::Eq => self.filter.values.iter().any(|v| *v == text),
            Operator::Ne => self.filter.values.iter().all(|v| *v != text),
            Operator::Gte => self
                .filter
                .values
                .iter()
                .any(|v| compare_query(v, field).is_some_and(Ordering::is_le)),
            Operator::Lte => self
                .filter
                .values
                .iter()
                .any(|v| compare_query(v, field).is_some_and(Ordering::is_ge)),
            Operator::Like => self.patterns.iter().any(|re| re.is_match(&text)),
        }
    }
}

/// Orders a query string against a stored value: numerically when the stored
/// value is a number or bool, lexically when it is a string.
fn compare_query(query: &str, field: &Value) -> Option<Ordering> {
    match field {
        Value::Number(n) => query.trim().parse::<f64>().ok()?.partial_cmp(&n.as_f64()?),
        Value::Bool(b) => query
            .trim()
            .parse::<f64>()
            .ok()?
            .partial_cmp(&f64::from(u8::from(*b))),
        Value::String(s) => Some(query.cmp(s.as_str())),
        _ => None,
    }
}

fn deep_contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::Array(items) => items.iter().any(|item| deep_contains(item, needle)),
        Value::Object(fields) => fields.values().any(|item| deep_contains(item, needle)),
        Value::Number(n) if n.as_f64() == Some(0.0) => false,
        Value::String(s) if s.is_empty() => false,
        other => stringify(other).to_lowercase().contains(needle),
    }
}

fn sort_records(records: &mut [&Value], sort: &str, order: &str) {
    let keys: Vec<&str> = sort.split(',').collect();
    let orders: Vec<String> = order.split(',').map(str::to_lowercase).collect();

    records.sort_by(|a, b| {
        keys.iter()
            .enumerate()
            .map(|(i, key)| {
                let ordering = compare_values(lookup(a, key), lookup(b, key));
                if orders.get(i).is_some_and(|o| o == "desc") {
                    ordering.reverse()
                } else {
                    ordering
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

/// Total order for sorting; missing and null values sink to the end.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            Some(Value::Bool(_)) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Array(_)) | Some(Value::Object(_)) => 3,
            Some(Value::Null) | None => 4,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Resolves the pagination parameters into a `[from, to)` window over `len`.
fn paginate(len: usize, query: &ListQuery) -> (usize, usize) {
    let int = |param: &Option<String>| param.as_deref().and_then(|p| p.trim().parse::<i64>().ok());
    let truthy = |param: &Option<String>| param.as_deref().is_some_and(|p| !p.is_empty());

    if truthy(&query.page) {
        let page = int(&query.page).filter(|&p| p >= 1).unwrap_or(1) as usize;
        let limit = int(&query.limit)
            .filter(|&l| l != 0)
            .map(|l| l.max(0) as usize)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        let from = (page - 1).saturating_mul(limit).min(len);
        (from, from.saturating_add(limit).min(len))
    } else if truthy(&query.end) {
        let start = int(&query.start).unwrap_or(0);
        let end = int(&query.end).unwrap_or(0);
        slice_bounds(len, start, end)
    } else if truthy(&query.limit) {
        let start = int(&query.start).unwrap_or(0);
        let limit = int(&query.limit).unwrap_or(0);
        slice_bounds(len, start, start.saturating_add(limit))
    } else {
        (0, len)
    }
}

/// `Array.prototype.slice` bounds: negatives count from the end.
fn slice_bounds(len: usize, start: i64, end: i64) -> (usize, usize) {
    let clamp = |i: i64| {
        if i < 0 {
            (len as i64 + i).max(0) as usize
        } else {
            (i as usize).min(len)
        }
    };

    let (from, to) = (clamp(start), clamp(end));
    (from, to.max(from))
}
