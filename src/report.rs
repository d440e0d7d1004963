//! Report assembly: recorded edges joined with maps translation and
//! symbol resolution, rendered as a text table or JSON.

use std::collections::HashMap;
use std::io::{self, Write};

use serde::Serialize;

use crate::maps_file::AddressMap;
use crate::record::CallRecord;
use crate::symbolize::{ObjectSymbols, SymbolInfo};

/// One side of a call edge, as far as it could be resolved.
#[derive(Debug, Clone, Serialize)]
pub struct FrameInfo {
    pub address: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl FrameInfo {
    fn unresolved(address: u64) -> Self {
        Self {
            address,
            object: None,
            offset: None,
            symbol: None,
            location: None,
        }
    }

    /// Human label: the symbol when known, the raw address otherwise.
    pub fn label(&self) -> String {
        match &self.symbol {
            Some(s) => s.clone(),
            None => format!("{:#x}", self.address),
        }
    }
}

/// One aggregated call edge.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub caller: FrameInfo,
    pub callee: FrameInfo,
    pub count: u64,
}

/// The full session report.
#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub total_calls: u64,
    pub distinct_edges: usize,
    pub rows: Vec<ReportRow>,
}

/// Per-object symbolizer cache. Objects that fail to load are remembered
/// as misses so each is attempted once.
pub struct SymbolResolver {
    cache: HashMap<String, Option<ObjectSymbols>>,
    demangle: bool,
}

impl SymbolResolver {
    pub fn new(demangle: bool) -> Self {
        Self {
            cache: HashMap::new(),
            demangle,
        }
    }

    /// Pre-seed the cache for `pathname`. Injection seam for embedders
    /// whose objects are not on the local filesystem, and for tests.
    pub fn preload(&mut self, pathname: &str, symbols: ObjectSymbols) {
        self.cache.insert(pathname.to_string(), Some(symbols));
    }

    fn resolve(&mut self, pathname: &str, offset: u64) -> SymbolInfo {
        let demangle = self.demangle;
        let entry = self.cache.entry(pathname.to_string()).or_insert_with(|| {
            match ObjectSymbols::load(std::path::Path::new(pathname)) {
                Ok(syms) => Some(syms),
                Err(e) => {
                    tracing::debug!(object = pathname, error = %e, "object not symbolizable");
                    None
                }
            }
        });
        entry
            .as_ref()
            .map(|syms| syms.lookup(offset, demangle))
            .unwrap_or_default()
    }
}

/// Join `records` with the address map and symbol resolution. Rows come
/// out sorted by descending count, ties broken by ascending edge key.
pub fn build_report(
    records: &[CallRecord],
    map: Option<&AddressMap>,
    resolver: &mut SymbolResolver,
    limit: Option<usize>,
) -> SessionReport {
    let mut rows: Vec<ReportRow> = records
        .iter()
        .map(|record| ReportRow {
            caller: resolve_frame(record.edge.caller(), map, resolver),
            callee: resolve_frame(record.edge.callsite(), map, resolver),
            count: record.count,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| edge_key(a).cmp(&edge_key(b)))
    });

    let total_calls = records.iter().map(|r| r.count).sum();
    let distinct_edges = records.len();
    if let Some(limit) = limit {
        rows.truncate(limit);
    }

    SessionReport {
        total_calls,
        distinct_edges,
        rows,
    }
}

fn edge_key(row: &ReportRow) -> u128 {
    ((row.caller.address as u128) << 64) | row.callee.address as u128
}

fn resolve_frame(
    address: u64,
    map: Option<&AddressMap>,
    resolver: &mut SymbolResolver,
) -> FrameInfo {
    let Some(map) = map else {
        return FrameInfo::unresolved(address);
    };
    let Some(oo) = map.translate(address) else {
        return FrameInfo::unresolved(address);
    };
    let info = resolver.resolve(&oo.pathname, oo.offset);
    FrameInfo {
        address,
        object: Some(oo.pathname),
        offset: Some(oo.offset),
        symbol: info.symbol,
        location: info.location,
    }
}

impl SessionReport {
    /// Render the report as a table.
    pub fn write_text(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(
            out,
            "╔══════════════════════════════════════════════════════════════════════════════╗"
        )?;
        writeln!(
            out,
            "║  Call Edge Profile (sorted by call count)                                    ║"
        )?;
        writeln!(
            out,
            "╚══════════════════════════════════════════════════════════════════════════════╝"
        )?;
        writeln!(out)?;
        writeln!(out, "{:>12}  {:<34} {:<34}", "Calls", "Caller", "Callee")?;
        writeln!(out, "{}", "─".repeat(84))?;

        for row in &self.rows {
            writeln!(
                out,
                "{:>12}  {:<34} {:<34}",
                row.count,
                row.caller.label(),
                row.callee.label()
            )?;
            if let Some(loc) = &row.callee.location {
                writeln!(out, "{:>12}  {:<34} {}", "", "", loc)?;
            }
        }

        writeln!(out, "{}", "─".repeat(84))?;
        writeln!(
            out,
            "{:>12}  total across {} distinct edges",
            self.total_calls, self.distinct_edges
        )?;
        Ok(())
    }

    /// Render the report as pretty-printed JSON.
    pub fn write_json(&self, out: &mut impl Write) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, self)?;
        writeln!(out)?;
        Ok(())
    }
}
