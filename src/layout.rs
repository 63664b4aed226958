// Layout ("spine") documents: strict and tolerant decoders, ticketed fetches.
// Rule: a bad layout degrades to fewer records, never to a halted show.
// See DESIGN.md: Layout loader

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DataError;
use crate::types::{PhaseId, PlacementRecord};

/// Which decoder reads a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Structured JSON only.
    Strict,
    /// Structured JSON, falling back to the tolerant scan when it does not parse.
    Auto,
    /// Regex scan over JSON-like text.
    Tolerant,
}

/// How an attachment name maps onto an asset file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetNaming {
    Attachment,
    /// Keep only the part before the first occurrence of the separator.
    TrimSuffix(char),
}

impl AssetNaming {
    fn file_stem<'a>(&self, attachment: &'a str) -> &'a str {
        match self {
            AssetNaming::Attachment => attachment,
            AssetNaming::TrimSuffix(sep) => attachment.split(*sep).next().unwrap_or(attachment),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutRequest {
    pub path: String,
    pub origin: String,
    pub mode: ParseMode,
    pub naming: AssetNaming,
}

impl LayoutRequest {
    /// Strict request tagged with `origin`.
    pub fn new(path: &str, origin: &str) -> Self {
        LayoutRequest {
            path: path.to_string(),
            origin: origin.to_string(),
            mode: ParseMode::Strict,
            naming: AssetNaming::Attachment,
        }
    }

    pub fn mode(mut self, mode: ParseMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn naming(mut self, naming: AssetNaming) -> Self {
        self.naming = naming;
        self
    }
}

/// Folder part of a layout path (empty when there is none).
pub fn asset_folder(path: &str) -> &str {
    path.rfind('/').map_or("", |i| &path[..i])
}

fn asset_path(request: &LayoutRequest, attachment: &str) -> String {
    let stem = request.naming.file_stem(attachment);
    let folder = asset_folder(&request.path);
    if folder.is_empty() {
        format!("{}.png", stem)
    } else {
        format!("{}/{}.png", folder, stem)
    }
}

/// Decodes a layout document with the request's parse mode.
pub fn decode_layout(
    request: &LayoutRequest,
    text: &str,
) -> Result<Vec<PlacementRecord>, DataError> {
    match request.mode {
        ParseMode::Strict => decode_strict(request, text),
        ParseMode::Tolerant => Ok(decode_tolerant(request, text)),
        ParseMode::Auto => match decode_strict(request, text) {
            Ok(records) => Ok(records),
            Err(err) => {
                debug!(path = %request.path, error = %err, "strict decode failed, scanning tolerantly");
                Ok(decode_tolerant(request, text))
            }
        },
    }
}

#[derive(Deserialize)]
struct SpineDocument {
    #[serde(default)]
    skins: Option<Skins>,
    #[serde(default)]
    slots: Vec<Slot>,
}

type SkinAttachments = HashMap<String, HashMap<String, serde_json::Value>>;

/// Older exports key skins by name; newer ones list them.
#[derive(Deserialize)]
#[serde(untagged)]
enum Skins {
    Map(HashMap<String, SkinAttachments>),
    List(Vec<NamedSkin>),
}

#[derive(Deserialize)]
struct NamedSkin {
    name: String,
    #[serde(default)]
    attachments: SkinAttachments,
}

#[derive(Deserialize)]
struct Slot {
    #[serde(default)]
    attachment: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Geometry {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    width: f64,
    height: f64,
}

impl Skins {
    fn into_default(self) -> Option<SkinAttachments> {
        match self {
            Skins::Map(mut map) => map.remove("default"),
            Skins::List(list) => list
                .into_iter()
                .find(|skin| skin.name == "default")
                .map(|skin| skin.attachments),
        }
    }
}

/// Structured decode. Slots whose attachment is missing from the default skin,
/// or whose geometry is incomplete, produce no record.
pub fn decode_strict(
    request: &LayoutRequest,
    text: &str,
) -> Result<Vec<PlacementRecord>, DataError> {
    let document: SpineDocument = serde_json::from_str(text).map_err(|e| DataError::Parse {
        path: request.path.clone(),
        message: e.to_string(),
    })?;

    let Some(skin) = document.skins.and_then(Skins::into_default) else {
        warn!(path = %request.path, "layout has no default skin");
        return Ok(Vec::new());
    };

    let mut records = Vec::with_capacity(document.slots.len());
    let mut skipped = 0usize;
    for slot in &document.slots {
        let Some(name) = slot.attachment.as_ref().and_then(|v| v.as_str()) else {
            skipped += 1;
            continue;
        };
        let geometry = skin
            .get(name)
            .and_then(|inner| inner.get(name))
            .and_then(|value| Geometry::deserialize(value).ok());
        match geometry {
            Some(g) => records.push(PlacementRecord {
                origin_tag: request.origin.clone(),
                attachment_name: name.to_string(),
                asset_path: asset_path(request, name),
                x: g.x,
                y: g.y,
                width: g.width,
                height: g.height,
            }),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(path = %request.path, skipped, "slots without usable attachment");
    }
    Ok(records)
}

static SLOTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""slots"\s*:\s*\[([\s\S]*?)\]"#).expect("valid regex"));
static ATTACHMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""attachment"\s*:\s*"([^"]+)""#).expect("valid regex"));
static COORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#""x"\s*:\s*([\d.-]+)\s*,\s*"y"\s*:\s*([\d.-]+)(?:\s*,\s*"width"\s*:\s*(\d+)\s*,\s*"height"\s*:\s*(\d+))?"#,
    )
    .expect("valid regex")
});

const TOLERANT_DEFAULT_SIZE: f64 = 64.0;

/// Regex scan for JSON-like text that does not parse. Attachment names come from the
/// `slots` array, coordinates from everything after `"skins"`; the two are paired by index.
pub fn decode_tolerant(request: &LayoutRequest, text: &str) -> Vec<PlacementRecord> {
    let slots = SLOTS_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or("", |m| m.as_str());
    let attachments: Vec<&str> = ATTACHMENT_RE
        .captures_iter(slots)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let skins = text.find("\"skins\"").map_or(text, |i| &text[i..]);
    let coords: Vec<(f64, f64, f64, f64)> = COORD_RE
        .captures_iter(skins)
        .filter_map(|c| {
            let x = c.get(1)?.as_str().parse::<f64>().ok()?;
            let y = c.get(2)?.as_str().parse::<f64>().ok()?;
            let size = |i: usize| {
                c.get(i)
                    .and_then(|m| m.as_str().parse::<f64>().ok())
                    .unwrap_or(TOLERANT_DEFAULT_SIZE)
            };
            Some((x, y, size(3), size(4)))
        })
        .collect();

    attachments
        .iter()
        .zip(coords)
        .map(|(name, (x, y, width, height))| PlacementRecord {
            origin_tag: request.origin.clone(),
            attachment_name: name.to_string(),
            asset_path: asset_path(request, name),
            x,
            y,
            width,
            height,
        })
        .collect()
}

/// Identifies one outstanding fetch handed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchTicket(u32);

impl FetchTicket {
    pub fn from_raw(raw: u32) -> Self {
        FetchTicket(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Results of one grouped load, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedLayouts {
    results: Vec<Result<Vec<PlacementRecord>, DataError>>,
}

impl LoadedLayouts {
    /// Records of request `i`; failed requests read as empty.
    pub fn records(&self, i: usize) -> &[PlacementRecord] {
        match self.results.get(i) {
            Some(Ok(records)) => records,
            _ => &[],
        }
    }

    /// All records, request order then document order.
    pub fn into_concat(self) -> Vec<PlacementRecord> {
        self.results
            .into_iter()
            .flat_map(|r| r.unwrap_or_default())
            .collect()
    }

    pub fn errors(&self) -> impl Iterator<Item = &DataError> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

struct PendingGroup<K> {
    owner: PhaseId,
    continuation: K,
    requests: Vec<LayoutRequest>,
    results: Vec<Option<Result<Vec<PlacementRecord>, DataError>>>,
}

/// Grouped, ticketed layout loads. A group's continuation is released once every member resolved.
pub struct LayoutLoads<K> {
    next_ticket: u32,
    next_group: u64,
    tickets: HashMap<FetchTicket, (u64, usize)>,
    groups: HashMap<u64, PendingGroup<K>>,
}

impl<K> LayoutLoads<K> {
    pub fn new() -> Self {
        LayoutLoads {
            next_ticket: 0,
            next_group: 0,
            tickets: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    /// Opens a group and returns one ticket per request, in order.
    pub fn begin(
        &mut self,
        owner: PhaseId,
        requests: Vec<LayoutRequest>,
        continuation: K,
    ) -> Vec<(FetchTicket, String)> {
        self.next_group += 1;
        let group = self.next_group;
        let mut issued = Vec::with_capacity(requests.len());
        for (slot, request) in requests.iter().enumerate() {
            self.next_ticket += 1;
            let ticket = FetchTicket(self.next_ticket);
            self.tickets.insert(ticket, (group, slot));
            issued.push((ticket, request.path.clone()));
        }
        let results = requests.iter().map(|_| None).collect();
        self.groups.insert(
            group,
            PendingGroup {
                owner,
                continuation,
                requests,
                results,
            },
        );
        issued
    }

    /// Records the host's answer for `ticket`: document text or a fetch error message.
    /// Returns the released continuation once the whole group is in. Unknown tickets are ignored.
    pub fn resolve(
        &mut self,
        ticket: FetchTicket,
        outcome: Result<String, String>,
    ) -> Option<(PhaseId, K, LoadedLayouts)> {
        let Some((group_id, slot)) = self.tickets.remove(&ticket) else {
            debug!(ticket = ticket.0, "late or unknown layout delivery ignored");
            return None;
        };
        let group = self.groups.get_mut(&group_id)?;
        let request = &group.requests[slot];
        let result = match outcome {
            Ok(text) => decode_layout(request, &text),
            Err(message) => Err(DataError::Fetch {
                path: request.path.clone(),
                message,
            }),
        };
        if let Err(err) = &result {
            warn!(path = %request.path, error = %err, "layout degraded to empty set");
        }
        group.results[slot] = Some(result);

        if group.results.iter().any(Option::is_none) {
            return None;
        }
        let group = self.groups.remove(&group_id)?;
        let results = group.results.into_iter().flatten().collect();
        Some((group.owner, group.continuation, LoadedLayouts { results }))
    }

    /// Forgets every load owned by `owner`; later deliveries for them are ignored.
    pub fn abandon(&mut self, owner: PhaseId) -> usize {
        let doomed: Vec<u64> = self
            .groups
            .iter()
            .filter(|(_, g)| g.owner == owner)
            .map(|(id, _)| *id)
            .collect();
        self.tickets.retain(|_, (group, _)| !doomed.contains(group));
        for id in &doomed {
            self.groups.remove(id);
        }
        doomed.len()
    }

    /// Tickets still waiting for the host.
    pub fn outstanding(&self) -> usize {
        self.tickets.len()
    }
}

impl<K> Default for LayoutLoads<K> {
    fn default() -> Self {
        Self::new()
    }
}
