use crate::graph::GraphInput;
use pregel_common::error::{PregelError, PregelResult};
use std::path::Path;

/// Reads `src,dst[,weight]` rows. A missing weight counts as 1; `#` starts a
/// comment line.
pub fn read_edges(path: impl AsRef<Path>) -> PregelResult<Vec<(String, String, u64)>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)
        .map_err(|e| PregelError::Io(e.into()))?;

    let mut out = Vec::new();
    for (line, rec) in rdr.records().enumerate() {
        let rec = rec.map_err(|e| PregelError::Internal(format!("csv read: {e}")))?;
        let field = |i: usize, what: &str| -> PregelResult<String> {
            rec.get(i)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    PregelError::InvalidArgument(format!("row {}: {what} missing", line + 1))
                })
        };
        let src = field(0, "source")?;
        let dst = field(1, "target")?;
        let weight: u64 = rec
            .get(2)
            .map(|s| s.trim().parse::<u64>())
            .transpose()
            .map_err(|e| {
                PregelError::InvalidArgument(format!("row {}: weight parse: {e}", line + 1))
            })?
            .unwrap_or(1);
        out.push((src, dst, weight));
    }
    Ok(out)
}

pub fn read_graph(path: impl AsRef<Path>) -> PregelResult<GraphInput<(), u64>> {
    Ok(GraphInput::from_edges(read_edges(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn weights_default_to_one() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# src,dst,weight").unwrap();
        writeln!(file, "a,b,4").unwrap();
        writeln!(file, "b, c").unwrap();
        file.flush().unwrap();

        let edges = read_edges(file.path()).unwrap();
        assert_eq!(
            edges,
            vec![
                ("a".to_string(), "b".to_string(), 4),
                ("b".to_string(), "c".to_string(), 1),
            ]
        );
        let graph = read_graph(file.path()).unwrap();
        assert_eq!(graph.vertex_count(), 3);
    }

    #[test]
    fn bad_weight_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a,b,heavy").unwrap();
        file.flush().unwrap();
        assert!(read_edges(file.path()).is_err());
    }
}
