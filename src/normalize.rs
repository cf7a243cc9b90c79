// Column label canonicalization.
//
// Labels are trimmed, separators become underscores, case is folded and
// diacritics are stripped through canonical decomposition. Labels that only
// differ in those respects collapse into one key; the collision is merged,
// not rejected.
use std::collections::BTreeMap;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::types::{CellValue, RawTable, DATE_COLUMN};

/// Portuguese connectives dropped between words, so that
/// `Tipo de Operação` and `tipo_operacao` share a key.
const CONNECTIVES: &[&str] = &["de", "da", "do", "das", "dos", "e"];

pub fn normalize_label(label: &str) -> String {
    let folded: String = label
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() || c == '-' { '_' } else { c })
        .collect::<String>()
        .to_lowercase()
        .nfd()
        .filter(|c| c.is_ascii())
        .collect();

    let words: Vec<&str> = folded.split('_').filter(|w| !w.is_empty()).collect();
    if words.len() <= 1 {
        return words.concat();
    }
    let kept: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| !CONNECTIVES.contains(w))
        .collect();
    if kept.is_empty() {
        words.join("_")
    } else {
        kept.join("_")
    }
}

/// Normalizes a whole header row at once.
pub fn normalize_labels<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
    labels.iter().map(|l| normalize_label(l.as_ref())).collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizationReport {
    /// Canonical key -> every raw label folded into it (only when >1).
    pub merged: BTreeMap<String, Vec<String>>,
    /// Positions of raw labels that normalized to an empty name.
    pub empty_labels: Vec<usize>,
}

/// Canonicalizes the header of `raw` and merges colliding columns.
///
/// Any canonical name listed in `date_aliases` becomes `date`. Where several
/// raw columns land on the same key, each row keeps the first non-empty cell
/// in column order.
pub fn normalize_table(raw: RawTable, date_aliases: &[String]) -> (RawTable, NormalizationReport) {
    let mut report = NormalizationReport::default();
    let mut columns: Vec<String> = Vec::new();
    let mut sources: Vec<Vec<usize>> = Vec::new();
    let mut labels_by_key: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (idx, label) in raw.columns.iter().enumerate() {
        let mut key = normalize_label(label);
        if key.is_empty() {
            warn!(position = idx, label = %label, "column label normalizes to an empty name");
            report.empty_labels.push(idx);
            key = format!("column_{}", idx);
        } else if date_aliases.iter().any(|a| a == &key) {
            key = DATE_COLUMN.to_string();
        }
        labels_by_key.entry(key.clone()).or_default().push(label.clone());
        match columns.iter().position(|c| c == &key) {
            Some(pos) => sources[pos].push(idx),
            None => {
                columns.push(key);
                sources.push(vec![idx]);
            }
        }
    }

    for (key, labels) in labels_by_key {
        if labels.len() > 1 {
            debug!(column = %key, ?labels, "merged colliding column labels");
            report.merged.insert(key, labels);
        }
    }

    let rows = raw
        .rows
        .into_iter()
        .map(|row| {
            sources
                .iter()
                .map(|idxs| {
                    idxs.iter()
                        .filter_map(|&i| row.get(i))
                        .find(|cell| !cell.is_empty())
                        .cloned()
                        .unwrap_or(CellValue::Empty)
                })
                .collect()
        })
        .collect();

    (RawTable { columns, rows }, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> Vec<String> {
        vec!["data".into(), "date".into()]
    }

    #[test]
    fn strips_case_accents_and_separators() {
        assert_eq!(normalize_label("  Horas Operação "), "horas_operacao");
        assert_eq!(normalize_label("Sub-Prefeitura"), "sub_prefeitura");
        assert_eq!(normalize_label("KM"), "km");
        assert_eq!(normalize_label("Turno   Noite"), "turno_noite");
        assert_eq!(normalize_label("Coleta 日本"), "coleta");
    }

    #[test]
    fn canonical_names_are_fixed_points() {
        for raw in ["Tipo de Operação", "Horas_Operacao", "  Média - KM ", "", "de", "__x__"] {
            let once = normalize_label(raw);
            assert_eq!(normalize_label(&once), once, "not idempotent for {:?}", raw);
        }
        let header = normalize_labels(&["Data", "Subprefeitura", "KM"]);
        assert_eq!(normalize_labels(&header), header);
    }

    #[test]
    fn accented_and_underscored_spellings_collide() {
        assert_eq!(normalize_label("Tipo de Operação"), "tipo_operacao");
        assert_eq!(normalize_label("tipo_operacao"), "tipo_operacao");
    }

    #[test]
    fn empty_label_is_not_a_crash() {
        assert_eq!(normalize_label(""), "");
        assert_eq!(normalize_label("   "), "");

        let mut raw = RawTable::new(vec!["".into(), "KM".into()]);
        raw.push_row(vec!["a".into(), CellValue::Number(1.0)]);
        let (table, report) = normalize_table(raw, &aliases());
        assert_eq!(table.columns, vec!["column_0", "km"]);
        assert_eq!(report.empty_labels, vec![0]);
    }

    #[test]
    fn collisions_keep_first_non_empty_cell() {
        let mut raw = RawTable::new(vec![
            "Tipo de Operação".into(),
            "KM".into(),
            "tipo_operacao".into(),
        ]);
        raw.push_row(vec![CellValue::Empty, CellValue::Number(3.0), "Varrição".into()]);
        raw.push_row(vec!["Coleta".into(), CellValue::Number(4.0), "Varrição".into()]);

        let (table, report) = normalize_table(raw, &aliases());
        assert_eq!(table.columns, vec!["tipo_operacao", "km"]);
        assert_eq!(table.rows[0], vec!["Varrição".into(), CellValue::Number(3.0)]);
        assert_eq!(table.rows[1], vec!["Coleta".into(), CellValue::Number(4.0)]);
        assert_eq!(report.merged["tipo_operacao"].len(), 2);
    }

    #[test]
    fn date_spellings_map_to_one_key() {
        let mut raw = RawTable::new(vec!["Data".into(), "DATE".into(), "KM".into()]);
        raw.push_row(vec!["01/02/2024".into(), CellValue::Empty, CellValue::Number(1.0)]);
        let (table, report) = normalize_table(raw, &aliases());
        assert_eq!(table.columns, vec!["date", "km"]);
        assert_eq!(report.merged["date"], vec!["Data".to_string(), "DATE".to_string()]);
    }
}
