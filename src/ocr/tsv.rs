//! Tesseract's per-word TSV report.
//!
//! Columns are `level page_num block_num par_num line_num word_num left top
//! width height conf text`. Only level 5 rows are words; the others describe
//! the page, block, paragraph and line containers and carry `conf = -1`.

use super::{BoundingBox, engines::EngineLine};

const WORD_LEVEL: u32 = 5;

/// Key identifying a text line within the page layout.
type LineKey = (u32, u32, u32, u32);

struct LineBuilder {
    key: LineKey,
    words: Vec<String>,
    confidences: Vec<f64>,
    bbox: BoundingBox,
}

/// Group word rows into lines, in the order Tesseract first reports them.
///
/// Returned confidences stay on Tesseract's 0–100 scale.
pub(crate) fn parse_tsv_lines(tsv: &str) -> Vec<EngineLine> {
    let mut lines: Vec<LineBuilder> = vec![];
    for row in tsv.lines() {
        let cols = row.splitn(12, '\t').collect::<Vec<_>>();
        if cols.len() < 12 {
            continue;
        }
        // The header row fails to parse here and is skipped.
        let Ok(level) = cols[0].parse::<u32>() else {
            continue;
        };
        if level != WORD_LEVEL {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        let conf = cols[10].trim().parse::<f64>().unwrap_or(-1.0);
        let text = cols[11].trim();
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (num(1), num(2), num(3), num(4));
        let (left, top, width, height) = (num(6), num(7), num(8), num(9));
        let word_box = BoundingBox {
            x0: left,
            y0: top,
            x1: left.saturating_add(width),
            y1: top.saturating_add(height),
        };

        match lines.iter_mut().find(|l| l.key == key) {
            Some(line) => {
                line.words.push(text.to_owned());
                line.confidences.push(conf);
                line.bbox = line.bbox.union(&word_box);
            }
            None => lines.push(LineBuilder {
                key,
                words: vec![text.to_owned()],
                confidences: vec![conf],
                bbox: word_box,
            }),
        }
    }

    lines
        .into_iter()
        .map(|line| EngineLine {
            text: line.words.join(" "),
            confidence: line.confidences.iter().sum::<f64>() / line.confidences.len() as f64,
            bbox: Some(line.bbox),
        })
        .collect()
}

/// Mean confidence of all words in a TSV report, on a 0–100 scale.
pub(crate) fn mean_word_confidence(tsv: &str) -> Option<f64> {
    let lines = parse_tsv_lines(tsv);
    if lines.is_empty() {
        return None;
    }
    Some(lines.iter().map(|l| l.confidence).sum::<f64>() / lines.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t
4\t1\t1\t1\t1\t0\t10\t10\t300\t20\t-1\t
5\t1\t1\t1\t1\t1\t10\t10\t100\t20\t90\tGROCERY
5\t1\t1\t1\t1\t2\t120\t12\t100\t20\t80\tSTORE
5\t1\t1\t1\t2\t1\t10\t40\t80\t20\t70\tApples
5\t1\t1\t1\t2\t2\t200\t40\t50\t20\t60\t2.99
5\t1\t1\t1\t3\t1\t10\t70\t50\t20\t95\t
";

    #[test]
    fn words_are_grouped_by_line() {
        let lines = parse_tsv_lines(SAMPLE);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "GROCERY STORE");
        assert!((lines[0].confidence - 85.0).abs() < 1e-9);
        assert_eq!(
            lines[0].bbox,
            Some(BoundingBox {
                x0: 10,
                y0: 10,
                x1: 220,
                y1: 32
            })
        );
        assert_eq!(lines[1].text, "Apples 2.99");
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(parse_tsv_lines("not\ta\ttsv").is_empty());
        assert_eq!(mean_word_confidence(""), None);
    }

    #[test]
    fn oversized_boxes_are_clamped() {
        let tsv = "5\t1\t1\t1\t1\t1\t4294967295\t4294967290\t10\t20\t90\tHUGE\n";
        let lines = parse_tsv_lines(tsv);
        assert_eq!(lines.len(), 1);
        let bbox = lines[0].bbox.unwrap();
        assert_eq!(bbox.x1, u32::MAX);
        assert_eq!(bbox.y1, u32::MAX);
    }

    #[test]
    fn mean_confidence_averages_lines() {
        let mean = mean_word_confidence(SAMPLE).unwrap();
        assert!((mean - 75.0).abs() < 1e-9);
    }
}
