use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::BTreeSet;
use log::{debug, warn};
use crate::profile::{Address, Profile};

/// Result of extracting one piece of a page. `Absent` means the page simply
/// does not carry it; `Malformed` means the markup was there but not in the
/// expected shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction<T> {
    Found(T),
    Absent,
    Malformed(String),
}

impl<T> Extraction<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Extraction::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Extraction::Malformed(_))
    }
}

/// Every field of a detail page, each extracted on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailExtraction {
    pub address: Extraction<Address>,
    pub phone: Extraction<String>,
    pub companies: Extraction<BTreeSet<String>>,
    pub businesses: Extraction<Vec<String>>,
    pub living_with: Extraction<Vec<String>>,
}

impl DetailExtraction {
    /// Collapses every field to its value or empty default. Malformed fields are logged.
    pub fn into_profile(self, source_url: &str) -> Profile {
        Profile {
            address: settle(self.address, "address", source_url),
            phone: settle(self.phone, "phone", source_url),
            companies: settle(self.companies, "companies", source_url).unwrap_or_default(),
            businesses: settle(self.businesses, "businesses", source_url).unwrap_or_default(),
            living_with: settle(self.living_with, "living_with", source_url).unwrap_or_default(),
            source_url: source_url.to_string(),
        }
    }
}

fn settle<T>(extraction: Extraction<T>, field: &str, url: &str) -> Option<T> {
    match extraction {
        Extraction::Found(value) => Some(value),
        Extraction::Absent => {
            debug!("No {} on {}", field, url);
            None
        }
        Extraction::Malformed(reason) => {
            warn!("Could not extract {} from {}: {}", field, url, reason);
            None
        }
    }
}

pub struct ProfileParser {
    structured_data: Selector,
    company_label: Selector,
    business_list: Selector,
    report_table: Selector,
    row: Selector,
    anchor: Selector,
    search_item: Selector,
    // Pages that inline the block without a typed script tag.
    inline_structured_data: Regex,
}

impl Default for ProfileParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileParser {
    pub fn new() -> Self {
        // All patterns below are constants and known to parse.
        ProfileParser {
            structured_data: Selector::parse(r#"script[type="application/ld+json"]"#).unwrap(),
            company_label: Selector::parse("span.engagement-company").unwrap(),
            business_list: Selector::parse("div#foretagPaAdressenLista").unwrap(),
            report_table: Selector::parse("table.rapport-table.rapport-table--limit-large-screens").unwrap(),
            row: Selector::parse("tr").unwrap(),
            anchor: Selector::parse("a").unwrap(),
            search_item: Selector::parse("div.search-list-item").unwrap(),
            inline_structured_data: Regex::new(r#"\[\{"@context.*\}\]"#).unwrap(),
        }
    }

    pub fn extract(&self, html: &str) -> DetailExtraction {
        let document = Html::parse_document(html);
        let (address, phone) = self.contact_details(&document, html);

        DetailExtraction {
            address,
            phone,
            companies: self.companies(&document),
            businesses: self.businesses(&document),
            living_with: self.living_with(&document),
        }
    }

    /// The detail link of the first search result. The search endpoint
    /// answers with JSON whose `htmlPrimary` member holds the result list markup.
    pub fn first_search_hit(&self, body: &str) -> Extraction<String> {
        let json: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => return Extraction::Malformed(format!("search response is not JSON: {}", e)),
        };
        let primary = match json.get("htmlPrimary").and_then(Value::as_str) {
            Some(p) => p,
            None => return Extraction::Malformed("search response has no htmlPrimary".to_string()),
        };

        let fragment = Html::parse_fragment(primary);
        let item = match fragment.select(&self.search_item).next() {
            Some(item) => item,
            None => return Extraction::Absent,
        };

        match item.select(&self.anchor).next().and_then(|a| a.value().attr("href")) {
            Some(href) if !href.trim().is_empty() => Extraction::Found(href.trim().to_string()),
            _ => Extraction::Malformed("first search result has no link".to_string()),
        }
    }

    fn contact_details(&self, document: &Html, raw: &str) -> (Extraction<Address>, Extraction<String>) {
        let mut blocks: Vec<String> = document
            .select(&self.structured_data)
            .map(|script| script.text().collect::<String>())
            .collect();
        if blocks.is_empty() {
            if let Some(m) = self.inline_structured_data.find(raw) {
                blocks.push(m.as_str().to_string());
            }
        }

        let mut parse_error = None;
        // Latest entry whose address was unusable; its phone still counts.
        let mut incomplete = None;
        for block in &blocks {
            let json: Value = match serde_json::from_str(block.trim()) {
                Ok(v) => v,
                Err(e) => {
                    parse_error = Some(format!("structured data is not valid JSON: {}", e));
                    continue;
                }
            };

            for entry in structured_entries(&json).into_iter().filter(|e| e.get("address").is_some()) {
                match address_of(entry) {
                    Extraction::Found(address) => return (Extraction::Found(address), telephone_of(entry)),
                    broken => incomplete = Some((broken, telephone_of(entry))),
                }
            }
        }

        match (incomplete, parse_error) {
            (Some(fields), _) => fields,
            (None, Some(reason)) => (Extraction::Malformed(reason.clone()), Extraction::Malformed(reason)),
            (None, None) => (Extraction::Absent, Extraction::Absent),
        }
    }

    fn companies(&self, document: &Html) -> Extraction<BTreeSet<String>> {
        let companies: BTreeSet<String> = document
            .select(&self.company_label)
            .map(|span| span.text().collect::<String>().trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        if companies.is_empty() {
            Extraction::Absent
        } else {
            Extraction::Found(companies)
        }
    }

    fn businesses(&self, document: &Html) -> Extraction<Vec<String>> {
        let container = match document.select(&self.business_list).next() {
            Some(c) => c,
            None => return Extraction::Absent,
        };

        let mut businesses = Vec::new();
        // First row is the table header.
        for (i, row) in container.select(&self.row).enumerate().skip(1) {
            match row.select(&self.anchor).next() {
                Some(link) => businesses.push(element_text(link)),
                None => return Extraction::Malformed(format!("business row {} has no link", i)),
            }
        }
        Extraction::Found(businesses)
    }

    fn living_with(&self, document: &Html) -> Extraction<Vec<String>> {
        let table = match document.select(&self.report_table).next() {
            Some(t) => t,
            None => return Extraction::Absent,
        };

        let residents = table
            .select(&self.row)
            .map(|row| element_text(row).replace('\n', ""))
            .filter(|line| !line.is_empty())
            .collect();
        Extraction::Found(residents)
    }
}

fn element_text(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Flattens a JSON-LD document into its entries: an array, a `@graph`, or a single object.
fn structured_entries(json: &Value) -> Vec<&Value> {
    match json {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("@graph") {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => vec![json],
        },
        _ => Vec::new(),
    }
}

fn address_of(entry: &Value) -> Extraction<Address> {
    let address = match entry.get("address") {
        Some(a) if a.is_object() => a,
        _ => return Extraction::Malformed("address is not an object".to_string()),
    };

    let field = |key: &str| -> Result<String, String> {
        match address.get(key) {
            Some(Value::String(s)) => Ok(s.trim().to_string()),
            Some(Value::Object(o)) => o
                .get("name")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .ok_or_else(|| format!("address {} has no name", key)),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(format!("address is missing {}", key)),
        }
    };

    let build = || -> Result<Address, String> {
        Ok(Address {
            country: field("addressCountry")?,
            locality: field("addressLocality")?,
            zip: field("postalCode")?,
            street: field("streetAddress")?,
        })
    };

    match build() {
        Ok(a) => Extraction::Found(a),
        Err(reason) => Extraction::Malformed(reason),
    }
}

fn telephone_of(entry: &Value) -> Extraction<String> {
    match entry.get("telephone") {
        None | Some(Value::Null) => Extraction::Absent,
        Some(Value::String(s)) if s.trim().is_empty() => Extraction::Absent,
        Some(Value::String(s)) => Extraction::Found(s.trim().to_string()),
        Some(Value::Array(numbers)) => match numbers.iter().find_map(Value::as_str) {
            Some(s) => Extraction::Found(s.trim().to_string()),
            None => Extraction::Absent,
        },
        Some(other) => Extraction::Malformed(format!("unexpected telephone value {}", other)),
    }
}
