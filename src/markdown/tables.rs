//! GFM pipe-table rendering for `<table>` elements.

use scraper::{ElementRef, Selector};

/// Render a `<table>` subtree as a GFM pipe table. Cells are flattened to
/// collapsed text; the first row becomes the header row.
pub(super) fn render(table: ElementRef<'_>, buf: &mut String) {
    let Ok(row_sel) = Selector::parse("tr") else {
        return;
    };
    let Ok(cell_sel) = Selector::parse("th, td") else {
        return;
    };

    let mut rows: Vec<Vec<String>> = Vec::new();
    for row in table.select(&row_sel) {
        let cells: Vec<String> = row
            .select(&cell_sel)
            .map(|cell| {
                cell.text()
                    .collect::<String>()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .replace('|', "\\|")
            })
            .collect();
        if !cells.is_empty() {
            rows.push(cells);
        }
    }

    if rows.is_empty() {
        return;
    }
    let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
    if cols == 0 {
        return;
    }

    push_row(buf, &rows[0], cols);
    buf.push('|');
    for _ in 0..cols {
        buf.push_str(" --- |");
    }
    buf.push('\n');
    for row in rows.iter().skip(1) {
        push_row(buf, row, cols);
    }
}

fn push_row(buf: &mut String, row: &[String], cols: usize) {
    buf.push('|');
    for i in 0..cols {
        let cell = row.get(i).map(String::as_str).unwrap_or("");
        buf.push(' ');
        buf.push_str(cell);
        buf.push_str(" |");
    }
    buf.push('\n');
}
