use pregel_common::error::{PregelError, PregelResult};
use pregel_common::types::VertexId;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Receives every local vertex once when an execution is finalized.
pub trait ResultWriter<V>: Send {
    fn write_vertex(&mut self, id: &VertexId, data: &V) -> PregelResult<()>;

    fn finish(&mut self) -> PregelResult<()> {
        Ok(())
    }
}

/// Shared in-memory sink; clones observe the same vertices.
pub struct CollectingResultWriter<V> {
    rows: Arc<Mutex<Vec<(VertexId, V)>>>,
}

impl<V> Clone for CollectingResultWriter<V> {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows.clone(),
        }
    }
}

impl<V> Default for CollectingResultWriter<V> {
    fn default() -> Self {
        Self {
            rows: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<V: Clone> CollectingResultWriter<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<(VertexId, V)> {
        self.rows
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl<V: Clone + Send> ResultWriter<V> for CollectingResultWriter<V> {
    fn write_vertex(&mut self, id: &VertexId, data: &V) -> PregelResult<()> {
        self.rows
            .lock()
            .map_err(|_| PregelError::Internal("result sink poisoned".to_string()))?
            .push((id.clone(), data.clone()));
        Ok(())
    }
}

pub struct DiscardResultWriter;

impl<V> ResultWriter<V> for DiscardResultWriter {
    fn write_vertex(&mut self, _id: &VertexId, _data: &V) -> PregelResult<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct Row<'a, V> {
    shard: &'a str,
    key: &'a str,
    value: &'a V,
}

/// One JSON object per vertex and line.
pub struct JsonLinesResultWriter {
    out: BufWriter<File>,
}

impl JsonLinesResultWriter {
    pub fn create(path: impl AsRef<Path>) -> PregelResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }
}

impl<V: Serialize> ResultWriter<V> for JsonLinesResultWriter {
    fn write_vertex(&mut self, id: &VertexId, data: &V) -> PregelResult<()> {
        let row = Row {
            shard: id.shard.as_str(),
            key: &id.key,
            value: data,
        };
        serde_json::to_writer(&mut self.out, &row)
            .map_err(|e| PregelError::Internal(format!("json encode: {e}")))?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> PregelResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Where a worker built from a serialized request writes its vertices.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSink {
    Discard,
    JsonLines(PathBuf),
}

impl ResultSink {
    pub fn writer<V: Serialize + Send + 'static>(&self) -> PregelResult<Box<dyn ResultWriter<V>>> {
        match self {
            ResultSink::Discard => Ok(Box::new(DiscardResultWriter)),
            ResultSink::JsonLines(path) => Ok(Box::new(JsonLinesResultWriter::create(path)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pregel_common::types::ShardId;

    #[test]
    fn json_lines_round_trip_through_serde() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("part.jsonl");
        let mut writer = JsonLinesResultWriter::create(&path).unwrap();
        let id = VertexId::new(ShardId::new("s0"), "v1");
        ResultWriter::<f64>::write_vertex(&mut writer, &id, &0.5).unwrap();
        ResultWriter::<f64>::finish(&mut writer).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let row: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(row["key"], "v1");
        assert_eq!(row["value"], 0.5);
    }
}
