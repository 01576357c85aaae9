//! Fixed Earth grid queries rendered as tables.

use clap::ValueEnum;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use cube_common::{BoundingBox, GridCandidate, GridSpec, LevelInfo};

/// Ordering of `grid res` results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SortKey {
    /// Smallest absolute deviation first
    #[default]
    Deviation,
    /// Smallest tile size first
    Tile,
    /// Deepest pyramid first
    Level,
    /// Coarsest resolution first
    InvRes,
}

/// Reorder candidates; ties keep the solver's order.
pub fn sort_candidates(candidates: &mut [GridCandidate], key: SortKey) {
    match key {
        SortKey::Deviation => candidates.sort_by(|a, b| {
            a.deviation_pct.abs().total_cmp(&b.deviation_pct.abs())
        }),
        SortKey::Tile => candidates.sort_by_key(|c| c.spec.tile),
        SortKey::Level => candidates.sort_by(|a, b| b.spec.level.cmp(&a.spec.level)),
        SortKey::InvRes => candidates.sort_by_key(|c| c.spec.inv_res),
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header);
    table
}

pub fn resolution_table(candidates: &[GridCandidate]) -> Table {
    let mut table = new_table(vec![
        "TILE",
        "LEVEL",
        "HEIGHT",
        "INV_RES",
        "RES (deg)",
        "RES (m)",
        "DEVIATION (%)",
    ]);
    for c in candidates {
        table.add_row(vec![
            c.spec.tile.to_string(),
            c.spec.level.to_string(),
            c.spec.height().to_string(),
            c.spec.inv_res.to_string(),
            format!("{:.10}", c.resolution_deg),
            format!("{:.4}", c.resolution_m),
            format!("{:.2}", c.deviation_pct),
        ]);
    }
    table
}

pub fn levels_table(levels: &[LevelInfo]) -> Table {
    let mut table = new_table(vec!["LEVEL", "HEIGHT", "INV_RES", "RES (deg)", "RES (m)"]);
    for l in levels {
        table.add_row(vec![
            l.level.to_string(),
            l.height.to_string(),
            l.inv_res.to_string(),
            format!("{:.10}", l.resolution_deg),
            format!("{:.4}", l.resolution_m),
        ]);
    }
    table
}

/// Cell counts of `bbox` at the finest resolution of `spec`.
pub fn cell_counts(bbox: &BoundingBox, spec: &GridSpec) -> (u64, u64) {
    let inv_res = spec.inv_res as f64;
    (
        (bbox.width() * inv_res).round() as u64,
        (bbox.height() * inv_res).round() as u64,
    )
}

pub fn abox_table(original: &BoundingBox, adjusted: &BoundingBox, spec: &GridSpec) -> Table {
    let (width, height) = cell_counts(adjusted, spec);
    let mut table = new_table(vec!["PROPERTY", "VALUE"]);
    table.add_row(vec!["Original box".to_string(), original.to_string()]);
    table.add_row(vec!["Adjusted box".to_string(), adjusted.to_string()]);
    table.add_row(vec!["Tile".to_string(), spec.tile.to_string()]);
    table.add_row(vec!["Level".to_string(), spec.level.to_string()]);
    table.add_row(vec!["Inverse resolution".to_string(), spec.inv_res.to_string()]);
    table.add_row(vec![
        "Resolution".to_string(),
        format!(
            "{:.10} deg ({:.4} m)",
            spec.resolution_deg(),
            spec.resolution_m()
        ),
    ]);
    table.add_row(vec!["Width (cells)".to_string(), width.to_string()]);
    table.add_row(vec!["Height (cells)".to_string(), height.to_string()]);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use cube_common::{adjust_bbox, find_grid_specs, Resolution, ResolutionSearch};

    fn candidates() -> Vec<GridCandidate> {
        find_grid_specs(
            Resolution::parse("300m").unwrap(),
            5.0,
            &ResolutionSearch::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_sort_by_deviation_keeps_best_first() {
        let mut found = candidates();
        sort_candidates(&mut found, SortKey::Deviation);
        let best = found[0];
        assert_eq!((best.spec.tile, best.spec.level, best.spec.inv_res), (540, 7, 384));
        for pair in found.windows(2) {
            assert!(pair[0].deviation_pct.abs() <= pair[1].deviation_pct.abs());
        }
    }

    #[test]
    fn test_sort_by_other_keys() {
        let mut found = candidates();
        sort_candidates(&mut found, SortKey::Tile);
        assert!(found.windows(2).all(|p| p[0].spec.tile <= p[1].spec.tile));

        sort_candidates(&mut found, SortKey::Level);
        assert!(found.windows(2).all(|p| p[0].spec.level >= p[1].spec.level));

        sort_candidates(&mut found, SortKey::InvRes);
        assert!(found.windows(2).all(|p| p[0].spec.inv_res <= p[1].spec.inv_res));
    }

    #[test]
    fn test_resolution_table_rows() {
        let found = candidates();
        let rendered = resolution_table(&found).to_string();
        assert!(rendered.contains("DEVIATION (%)"));
        assert!(rendered.contains("69120"));
        assert!(rendered.contains("-3.37"));
        assert_eq!(resolution_table(&found).row_iter().count(), found.len());
    }

    #[test]
    fn test_abox_cell_counts() {
        let bbox = BoundingBox::new(0.1, 40.1, 9.9, 49.9);
        let (adjusted, spec) = adjust_bbox(&bbox, 384).unwrap();
        let (width, height) = cell_counts(&adjusted, &spec);
        assert_eq!(width as f64, (adjusted.width() * 384.0).round());
        assert_eq!(height % spec.tile as u64, 0);
        assert!(abox_table(&bbox, &adjusted, &spec)
            .to_string()
            .contains("Adjusted box"));
    }
}
