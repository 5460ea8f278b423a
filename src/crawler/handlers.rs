//! Parse stage handlers
//!
//! Each stage turns a fetched body plus the WorkItem's context into new
//! WorkItems and/or a partial record. Handlers do no I/O; the coordinator feeds
//! their output to the scheduler and the merge engine.

use crate::config::{Config, PolicyConfig};
use crate::crawler::extract::{extract_json, extract_string, extract_u64};
use crate::merge::{merge_records, MergeConflict};
use crate::model::{
    CatalogRecord, ListingQuery, Priority, ReaderEntry, SubResource, WorkContext, WorkItem,
};
use crate::{HarvestError, ParseError, ParseResult};
use scraper::{Html, Selector};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

/// Names of the script variables on a reader page
const READER_OBJ_VAR: &str = "readerObj";
const PAGE_NUM_VAR: &str = "pageNum";
const IMG_URL_VAR: &str = "imgUrl";

/// Everything a handler emits for one WorkItem
#[derive(Debug, Default)]
pub struct StageOutput {
    /// Derived WorkItems, to be enqueued
    pub work: Vec<WorkItem>,

    /// Partial record for the merge engine
    pub partial: Option<CatalogRecord>,

    /// Reader entry for the owning record `(owner_id, entry)`
    pub reader_entry: Option<(String, ReaderEntry)>,

    /// Conflicts met while merging the listing partial into the detail payload
    pub conflicts: Vec<MergeConflict>,

    /// Self-referential sub-resources removed by policy
    pub filtered_sub_resources: usize,
}

/// Decides which embedded sub-resources point back at their own parent
///
/// Always drops a sub-resource carrying its parent's id; additionally drops
/// those whose type tag is listed in the data-set specific policy.
#[derive(Debug, Clone, Default)]
pub struct SubResourcePolicy {
    tag_key: Option<String>,
    excluded_tags: Vec<String>,
}

impl SubResourcePolicy {
    pub fn new(tag_key: Option<String>, excluded_tags: Vec<String>) -> Self {
        Self {
            tag_key,
            excluded_tags,
        }
    }

    pub fn is_self_reference(&self, parent_id: &str, sub: &SubResource) -> bool {
        if sub.id == parent_id {
            return true;
        }
        match &self.tag_key {
            Some(key) => sub
                .tag(key)
                .is_some_and(|tag| self.excluded_tags.iter().any(|t| t == tag)),
            None => false,
        }
    }

    /// Removes self-referential entries, returning how many were dropped
    pub fn apply(&self, record: &mut CatalogRecord) -> usize {
        let before = record.sub_resources.len();
        let parent_id = record.id.clone();
        record
            .sub_resources
            .retain(|sub| !self.is_self_reference(&parent_id, sub));
        before - record.sub_resources.len()
    }
}

impl From<&PolicyConfig> for SubResourcePolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self::new(
            config.self_reference_tag_key.clone(),
            config.self_reference_tags.clone(),
        )
    }
}

/// Listing response envelope
#[derive(Debug, Deserialize)]
struct ListingResponse {
    code: Value,
    data: Option<ListingData>,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(rename = "curPage", deserialize_with = "lenient_u64")]
    cur_page: u64,

    #[serde(rename = "totalPages", deserialize_with = "lenient_u64")]
    total_pages: u64,

    #[serde(rename = "totalRecords", deserialize_with = "lenient_u64")]
    total_records: u64,

    #[serde(default)]
    results: Vec<Value>,
}

/// The stage handlers, bound to one catalog configuration
#[derive(Debug, Clone)]
pub struct StageHandlers {
    base_url: Url,
    listing_url: String,
    page_size: u32,
    search_id: String,
    sort_order: String,
    site_id: Option<String>,
    filter_field: Option<String>,
    total_records_cap: u64,
    success_code: i64,
    seeds: Vec<ListingQuery>,
    detail_url_template: String,
    detail_variable: String,
    reader_field_keys: Vec<String>,
    legacy_viewer_marker: String,
    legacy_file_param: String,
    policy: SubResourcePolicy,
}

impl StageHandlers {
    pub fn from_config(config: &Config) -> Result<Self, HarvestError> {
        Ok(Self {
            base_url: Url::parse(&config.origin.base_url)?,
            listing_url: config.catalog.listing_url.clone(),
            page_size: config.catalog.page_size,
            search_id: config.catalog.search_id.clone(),
            sort_order: config.catalog.sort_order.clone(),
            site_id: config.catalog.site_id.clone(),
            filter_field: config.catalog.filter_field.clone(),
            total_records_cap: config.catalog.total_records_cap,
            success_code: config.catalog.success_code,
            seeds: config
                .catalog
                .seeds
                .iter()
                .map(|seed| ListingQuery {
                    seed: seed.name.clone(),
                    filter: seed.filter.clone(),
                })
                .collect(),
            detail_url_template: config.detail.url_template.clone(),
            detail_variable: config.detail.variable.clone(),
            reader_field_keys: config.detail.reader_field_keys.clone(),
            legacy_viewer_marker: config.reader.legacy_viewer_marker.clone(),
            legacy_file_param: config.reader.legacy_file_param.clone(),
            policy: SubResourcePolicy::from(&config.policy),
        })
    }

    /// First listing page of every seed query, in seed order
    pub fn seed_items(&self) -> Vec<WorkItem> {
        self.seeds
            .iter()
            .map(|query| self.listing_item(query, 1, Priority::SEED))
            .collect()
    }

    /// Listing WorkItem for `page` of `query`
    pub fn listing_item(&self, query: &ListingQuery, page: u32, priority: Priority) -> WorkItem {
        let classifies = match (&self.filter_field, &query.filter) {
            (Some(field), Some(filter)) => json!([{
                "id": format!("{}:{}", field, filter),
                "pid": field,
                "name": "x(0)",
            }]),
            _ => json!([]),
        };

        let mut body = json!({
            "page": page,
            "pageSize": self.page_size,
            "searchId": self.search_id,
            "sorts": {"value": self.sort_order},
            "classifies": classifies,
        });
        if let Some(site_id) = &self.site_id {
            body["wfwfid"] = json!(site_id);
        }

        WorkItem::listing(&self.listing_url, body, query.clone(), page, priority)
    }

    /// Detail page URL of record `id`
    pub fn detail_url(&self, id: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
        self.detail_url_template.replace("{id}", &encoded)
    }

    /// Runs the handler matching the item's stage
    pub fn handle(&self, item: &WorkItem, body: &str) -> ParseResult<StageOutput> {
        match &item.context {
            WorkContext::Listing { query, page } => {
                self.handle_listing(body, query, *page, item.priority)
            }
            WorkContext::Detail {
                id,
                listing_partial,
                parent_id,
            } => self.handle_detail(
                body,
                id,
                listing_partial.as_deref().cloned(),
                parent_id.clone(),
                item.priority,
            ),
            WorkContext::Reader { owner_id, .. } => self.handle_reader(item, owner_id, body),
        }
    }

    fn handle_listing(
        &self,
        body: &str,
        query: &ListingQuery,
        page: u32,
        priority: Priority,
    ) -> ParseResult<StageOutput> {
        let response: ListingResponse = serde_json::from_str(body)?;

        if response.code.as_i64() != Some(self.success_code)
            && response.code.as_str().and_then(|s| s.parse().ok()) != Some(self.success_code)
        {
            return Err(ParseError::ContractViolation(format!(
                "listing code {} is not the success code {}",
                response.code, self.success_code
            )));
        }

        let data = response
            .data
            .ok_or_else(|| ParseError::MissingField("data".to_string()))?;

        if data.cur_page != u64::from(page) {
            return Err(ParseError::ContractViolation(format!(
                "requested page {} but got page {}",
                page, data.cur_page
            )));
        }
        if data.total_records > self.total_records_cap {
            return Err(ParseError::ContractViolation(format!(
                "totalRecords {} exceeds the API cap of {}",
                data.total_records, self.total_records_cap
            )));
        }
        if data.results.len() > self.page_size as usize {
            return Err(ParseError::ContractViolation(format!(
                "page holds {} results, page size is {}",
                data.results.len(),
                self.page_size
            )));
        }

        let mut output = StageOutput::default();

        for (position, result) in data.results.into_iter().enumerate() {
            let mut partial = match CatalogRecord::from_value(result) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(
                        seed = %query.seed,
                        page,
                        position,
                        error = %e,
                        "Skipping malformed listing result"
                    );
                    continue;
                }
            };
            output.filtered_sub_resources += self.policy.apply(&mut partial);

            let item_priority = priority.for_result(position);
            let sub_items: Vec<WorkItem> = partial
                .sub_resources
                .iter()
                .enumerate()
                .map(|(ordinal, sub)| {
                    WorkItem::detail(
                        self.detail_url(&sub.id),
                        sub.id.clone(),
                        None,
                        Some(partial.id.clone()),
                        item_priority.for_sub_resource(ordinal),
                    )
                })
                .collect();

            output.work.push(WorkItem::detail(
                self.detail_url(&partial.id),
                partial.id.clone(),
                Some(partial),
                None,
                item_priority,
            ));
            output.work.extend(sub_items);
        }

        if data.cur_page < data.total_pages {
            output
                .work
                .push(self.listing_item(query, page + 1, priority.next_page()));
        }

        Ok(output)
    }

    fn handle_detail(
        &self,
        body: &str,
        id: &str,
        listing_partial: Option<CatalogRecord>,
        parent_id: Option<String>,
        priority: Priority,
    ) -> ParseResult<StageOutput> {
        let mut payload: Value = extract_json(body, &self.detail_variable)?;
        match payload.as_object_mut() {
            Some(map) if !map.contains_key("id") => {
                map.insert("id".to_string(), json!(id));
            }
            Some(_) => {}
            None => {
                return Err(ParseError::ContractViolation(format!(
                    "`{}` is not an object",
                    self.detail_variable
                )))
            }
        }

        let mut record = CatalogRecord::from_value(payload)?;
        if record.id != id {
            return Err(ParseError::ContractViolation(format!(
                "requested record {} but detail payload is {}",
                id, record.id
            )));
        }

        let mut output = StageOutput::default();

        record = match (listing_partial, parent_id) {
            (_, Some(parent_id)) => {
                record.parent_id = Some(parent_id);
                record
            }
            (Some(listing), None) => {
                let mut merged = listing;
                output.conflicts = merge_records(&mut merged, record);
                merged.merged = true;
                merged
            }
            (None, None) => record,
        };
        output.filtered_sub_resources = self.policy.apply(&mut record);

        let mut references = Vec::new();
        for reference in record.reader_references(&self.reader_field_keys) {
            match self.base_url.join(&reference) {
                Ok(url) => references.push(url.to_string()),
                Err(e) => tracing::warn!(
                    owner = %record.id,
                    reference = %reference,
                    error = %e,
                    "Skipping unparsable reader reference"
                ),
            }
        }
        if let Some((first, rest)) = references.split_first() {
            output.work.push(WorkItem::reader(
                first.clone(),
                record.id.clone(),
                0,
                rest.to_vec(),
                priority,
            ));
        }

        output.partial = Some(record);
        Ok(output)
    }

    fn handle_reader(
        &self,
        item: &WorkItem,
        owner_id: &str,
        body: &str,
    ) -> ParseResult<StageOutput> {
        let entry = if self.is_legacy_viewer(&item.target) {
            ReaderEntry::Blob(self.legacy_blob_url(&item.target, body)?)
        } else {
            ReaderEntry::Structured {
                chapter_tree: extract_json(body, READER_OBJ_VAR)?,
                page_count: extract_u64(body, PAGE_NUM_VAR)?,
                image_directory: extract_string(body, IMG_URL_VAR)?,
            }
        };

        Ok(StageOutput {
            work: item.next_volume().into_iter().collect(),
            reader_entry: Some((owner_id.to_string(), entry)),
            ..StageOutput::default()
        })
    }

    fn is_legacy_viewer(&self, target: &str) -> bool {
        Url::parse(target)
            .map(|url| url.path().contains(&self.legacy_viewer_marker))
            .unwrap_or(false)
    }

    /// Blob URL behind a legacy viewer
    ///
    /// The blob path is the viewer's file parameter. When the target itself
    /// lacks it, the viewer page is searched for a frame or refresh link that
    /// carries it.
    fn legacy_blob_url(&self, target: &str, body: &str) -> ParseResult<String> {
        let target_url = Url::parse(target).map_err(|e| {
            ParseError::ContractViolation(format!("invalid reader target {}: {}", target, e))
        })?;

        if let Some(file) = self.file_param(&target_url) {
            return self.resolve_blob(&target_url, &file);
        }

        let document = Html::parse_document(body);
        for candidate in viewer_links(&document) {
            let Ok(link) = target_url.join(&candidate) else {
                continue;
            };
            if let Some(file) = self.file_param(&link) {
                return self.resolve_blob(&link, &file);
            }
        }

        Err(ParseError::ContractViolation(format!(
            "legacy viewer {} carries no `{}` parameter",
            target, self.legacy_file_param
        )))
    }

    fn file_param(&self, url: &Url) -> Option<String> {
        url.query_pairs()
            .find(|(key, value)| key == self.legacy_file_param.as_str() && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    }

    fn resolve_blob(&self, viewer: &Url, file: &str) -> ParseResult<String> {
        viewer
            .join(file)
            .map(|url| url.to_string())
            .map_err(|e| ParseError::ContractViolation(format!("invalid blob path {}: {}", file, e)))
    }
}

/// Frame sources and refresh targets of a viewer page
fn viewer_links(document: &Html) -> Vec<String> {
    let mut links = Vec::new();

    for (selector, attr) in [
        ("iframe[src]", "src"),
        ("embed[src]", "src"),
        ("object[data]", "data"),
        ("a[href]", "href"),
    ] {
        if let Ok(selector) = Selector::parse(selector) {
            links.extend(
                document
                    .select(&selector)
                    .filter_map(|element| element.value().attr(attr))
                    .map(str::to_string),
            );
        }
    }

    if let Ok(selector) = Selector::parse("meta[http-equiv][content]") {
        for element in document.select(&selector) {
            let is_refresh = element
                .value()
                .attr("http-equiv")
                .is_some_and(|v| v.eq_ignore_ascii_case("refresh"));
            let content = element.value().attr("content").unwrap_or_default();
            if let (true, Some(pos)) = (is_refresh, content.to_ascii_lowercase().find("url=")) {
                links.push(content[pos + 4..].trim().trim_matches('\'').to_string());
            }
        }
    }

    links
}

/// Counts arrive as numbers or numeric strings
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| de::Error::custom(format!("not a count: {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("not a count: {:?}", s))),
        other => Err(de::Error::custom(format!("not a count: {}", other))),
    }
}
