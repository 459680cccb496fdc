//! A data source that records every physical call made against it

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};
use sqlx_batch_runner::{
   Connection, ConnectionRef, DataSource, DataSourceHandle, IsolationLevel, Row,
};
use sqlx_tx_conn_mgr::{Error as ConnError, Result as ConnResult};

/// Routes runner logs to the test harness; repeated calls are harmless
pub fn init_tracing() {
   let _ = tracing_subscriber::fmt()
      .with_test_writer()
      .with_max_level(tracing::Level::TRACE)
      .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
   pub connection: usize,
   pub primitive: &'static str,
   pub sql: String,
   pub rows: Vec<Vec<JsonValue>>,
}

#[derive(Default)]
pub struct Recorder {
   calls: Mutex<Vec<Call>>,
   query_rows: Mutex<Vec<Row>>,
   fail_on: Mutex<Option<String>>,
   pub opened: AtomicUsize,
   pub closed: AtomicUsize,
   pub commits: AtomicUsize,
   pub rollbacks: AtomicUsize,
   next_key: AtomicUsize,
}

impl Recorder {
   pub fn calls(&self) -> Vec<Call> {
      self.calls.lock().clone()
   }

   /// Physical calls made through the given primitive
   pub fn calls_of(&self, primitive: &str) -> Vec<Call> {
      self
         .calls()
         .into_iter()
         .filter(|c| c.primitive == primitive)
         .collect()
   }

   /// Rows every subsequent query returns
   pub fn set_query_rows(&self, rows: Vec<Row>) {
      *self.query_rows.lock() = rows;
   }

   /// Makes every statement containing `fragment` fail
   pub fn fail_on(&self, fragment: &str) {
      *self.fail_on.lock() = Some(fragment.to_string());
   }

   fn record(
      &self,
      connection: usize,
      primitive: &'static str,
      sql: &str,
      rows: Vec<Vec<JsonValue>>,
   ) -> ConnResult<()> {
      if let Some(fragment) = self.fail_on.lock().as_deref()
         && sql.contains(fragment)
      {
         return Err(ConnError::Driver(format!("statement rejected: {sql}")));
      }
      self.calls.lock().push(Call {
         connection,
         primitive,
         sql: sql.to_string(),
         rows,
      });
      Ok(())
   }

   fn key_row(&self) -> Row {
      let id = self.next_key.fetch_add(1, Ordering::SeqCst) + 1;
      [("id".to_string(), json!(id))].into_iter().collect()
   }
}

pub struct RecordingConnection {
   id: usize,
   recorder: Arc<Recorder>,
   closed: AtomicBool,
}

impl RecordingConnection {
   fn check_open(&self) -> ConnResult<()> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(ConnError::ConnectionClosed);
      }
      Ok(())
   }
}

impl Connection for RecordingConnection {
   fn set_auto_commit(&self, _auto_commit: bool) -> ConnResult<()> {
      self.check_open()
   }

   fn set_isolation_level(&self, _level: IsolationLevel) -> ConnResult<()> {
      self.check_open()
   }

   fn commit(&self) -> ConnResult<()> {
      self.check_open()?;
      self.recorder.commits.fetch_add(1, Ordering::SeqCst);
      Ok(())
   }

   fn rollback(&self) -> ConnResult<()> {
      self.check_open()?;
      self.recorder.rollbacks.fetch_add(1, Ordering::SeqCst);
      Ok(())
   }

   fn execute(&self, sql: &str, params: &[JsonValue]) -> ConnResult<u64> {
      self.check_open()?;
      self.recorder.record(self.id, "execute", sql, vec![params.to_vec()])?;
      Ok(1)
   }

   fn query(&self, sql: &str, params: &[JsonValue]) -> ConnResult<Vec<Row>> {
      self.check_open()?;
      self.recorder.record(self.id, "query", sql, vec![params.to_vec()])?;
      Ok(self.recorder.query_rows.lock().clone())
   }

   fn insert(&self, sql: &str, params: &[JsonValue]) -> ConnResult<Vec<Row>> {
      self.check_open()?;
      self.recorder.record(self.id, "insert", sql, vec![params.to_vec()])?;
      Ok(vec![self.recorder.key_row()])
   }

   fn batch(&self, sql: &str, rows: &[Vec<JsonValue>]) -> ConnResult<Vec<u64>> {
      self.check_open()?;
      self.recorder.record(self.id, "batch", sql, rows.to_vec())?;
      Ok(vec![1; rows.len()])
   }

   fn insert_batch(&self, sql: &str, rows: &[Vec<JsonValue>]) -> ConnResult<Vec<Row>> {
      self.check_open()?;
      self.recorder.record(self.id, "insert_batch", sql, rows.to_vec())?;
      Ok(rows.iter().map(|_| self.recorder.key_row()).collect())
   }

   fn close(&self) -> ConnResult<()> {
      if !self.closed.swap(true, Ordering::SeqCst) {
         self.recorder.closed.fetch_add(1, Ordering::SeqCst);
      }
      Ok(())
   }

   fn is_closed(&self) -> bool {
      self.closed.load(Ordering::SeqCst)
   }
}

#[derive(Default)]
pub struct RecordingSource {
   pub recorder: Arc<Recorder>,
}

impl DataSource for RecordingSource {
   fn get_connection(&self) -> ConnResult<ConnectionRef> {
      let id = self.recorder.opened.fetch_add(1, Ordering::SeqCst) + 1;
      Ok(Arc::new(RecordingConnection {
         id,
         recorder: Arc::clone(&self.recorder),
         closed: AtomicBool::new(false),
      }))
   }

   fn name(&self) -> &str {
      "recording"
   }
}

/// A row with columns in the given order
pub fn row(columns: &[(&str, JsonValue)]) -> Row {
   columns
      .iter()
      .map(|(name, value)| (name.to_string(), value.clone()))
      .collect()
}

/// A fresh recording source and the recorder observing it
pub fn recording_source() -> (DataSourceHandle, Arc<Recorder>) {
   init_tracing();
   let source = RecordingSource::default();
   let recorder = Arc::clone(&source.recorder);
   (DataSourceHandle::new(source), recorder)
}
