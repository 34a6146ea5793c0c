//! End-to-end pooling behavior against real SQLite database files

use sqlite_conn_pool::{Connection, ConnectionFactory, NativeDriver, PoolConfig};
use std::sync::Arc;

fn test_factory() -> Arc<ConnectionFactory> {
   ConnectionFactory::new(
      Arc::new(NativeDriver),
      PoolConfig {
         background_pruning: false,
         ..Default::default()
      },
   )
}

fn file_connection_string(dir: &tempfile::TempDir, name: &str) -> String {
   format!("Data Source={}", dir.path().join(name).display())
}

#[test]
fn test_state_persists_across_reopens_of_the_same_string() {
   let dir = tempfile::tempdir().unwrap();
   let factory = test_factory();
   let cs = file_connection_string(&dir, "app.db");

   {
      let mut conn = factory.get_connection(&cs).unwrap();
      conn.execute("CREATE TABLE users (name TEXT)").unwrap();
      assert_eq!(conn.execute("INSERT INTO users VALUES ('alice'), ('bob')").unwrap(), 2);
   }

   let mut conn = factory.get_connection(&cs).unwrap();
   assert_eq!(
      conn.query_scalar_i64("SELECT COUNT(*) FROM users").unwrap(),
      Some(2)
   );
   factory.shutdown();
}

#[test]
fn test_session_state_survives_pooled_reuse() {
   let dir = tempfile::tempdir().unwrap();
   let factory = test_factory();
   let cs = file_connection_string(&dir, "temp.db");

   // A TEMP table lives on the physical connection, not in the file, so
   // seeing it again proves the same native handle was reused.
   {
      let mut conn = factory.get_connection(&cs).unwrap();
      conn.execute("CREATE TEMP TABLE scratch (x INTEGER)").unwrap();
      conn.execute("INSERT INTO scratch VALUES (7)").unwrap();
   }

   let mut conn = factory.get_connection(&cs).unwrap();
   assert_eq!(
      conn.query_scalar_i64("SELECT x FROM scratch").unwrap(),
      Some(7)
   );
   factory.shutdown();
}

#[test]
fn test_memory_connections_are_independent() {
   let factory = test_factory();

   let mut first = factory.get_connection("Data Source=:memory:").unwrap();
   first.execute("CREATE TABLE t (x INTEGER)").unwrap();
   drop(first);

   // :memory: never pools: the next open is a brand-new empty database
   let mut second = factory.get_connection("Data Source=:memory:").unwrap();
   assert!(second.query_scalar_i64("SELECT COUNT(*) FROM t").is_err());
   factory.shutdown();
}

#[test]
fn test_clear_pool_discards_session_state() {
   let dir = tempfile::tempdir().unwrap();
   let factory = test_factory();
   let cs = file_connection_string(&dir, "clear.db");

   {
      let mut conn = factory.get_connection(&cs).unwrap();
      conn.execute("CREATE TEMP TABLE scratch (x INTEGER)").unwrap();
   }
   factory.clear_pool(&cs);

   // The cleared pool's handle is gone; the replacement has no TEMP table
   let mut conn = factory.get_connection(&cs).unwrap();
   assert!(conn.query_scalar_i64("SELECT COUNT(*) FROM scratch").is_err());
   factory.shutdown();
}

#[test]
fn test_registrations_are_wiped_between_checkouts() {
   let dir = tempfile::tempdir().unwrap();
   let factory = test_factory();
   let cs = file_connection_string(&dir, "funcs.db");

   {
      let mut conn = factory.get_connection(&cs).unwrap();
      conn
         .create_scalar_function(
            "shout",
            1,
            Box::new(|args| {
               let s = args[0].as_text().unwrap_or_default();
               Ok(sqlite_conn_pool::Value::Text(s.to_uppercase()))
            }),
         )
         .unwrap();
      assert_eq!(conn.query_scalar_i64("SELECT length(shout('hi'))").unwrap(), Some(2));
   }

   // Same physical connection, fresh session: the function must be gone
   let mut conn = factory.get_connection(&cs).unwrap();
   assert!(conn.query_scalar_i64("SELECT length(shout('hi'))").is_err());
   factory.shutdown();
}

#[test]
fn test_aggregate_registrations_are_wiped_between_checkouts() {
   let dir = tempfile::tempdir().unwrap();
   let factory = test_factory();
   let cs = file_connection_string(&dir, "aggs.db");

   {
      let mut conn = factory.get_connection(&cs).unwrap();
      conn.execute("CREATE TABLE t (x INTEGER)").unwrap();
      conn.execute("INSERT INTO t VALUES (1), (2), (3)").unwrap();

      conn
         .create_aggregate(
            "tally",
            1,
            Box::new(|acc, _args| {
               *acc = sqlite_conn_pool::Value::Integer(acc.as_integer().unwrap_or(0) + 1);
               Ok(())
            }),
            Box::new(Ok),
         )
         .unwrap();
      assert_eq!(conn.query_scalar_i64("SELECT tally(x) FROM t").unwrap(), Some(3));
   }

   // Same physical connection, fresh session: the aggregate must be gone
   let mut conn = factory.get_connection(&cs).unwrap();
   assert!(conn.query_scalar_i64("SELECT tally(x) FROM t").is_err());
   factory.shutdown();
}

#[test]
fn test_prune_cycle_closes_idle_connections() {
   let dir = tempfile::tempdir().unwrap();
   let factory = test_factory();
   let cs = file_connection_string(&dir, "prune.db");

   {
      let mut conn = factory.get_connection(&cs).unwrap();
      conn.execute("CREATE TEMP TABLE scratch (x INTEGER)").unwrap();
   }

   // Two sweeps age the idle connection out (warm, then cold, then closed)
   factory.prune_now();
   factory.prune_now();

   let mut conn = factory.get_connection(&cs).unwrap();
   assert!(
      conn.query_scalar_i64("SELECT COUNT(*) FROM scratch").is_err(),
      "pruned handle must not come back"
   );
   factory.shutdown();
}

#[test]
fn test_concurrent_opens_share_the_file() {
   let dir = tempfile::tempdir().unwrap();
   let factory = test_factory();
   let cs = file_connection_string(&dir, "shared.db");

   {
      let mut conn = factory.get_connection(&cs).unwrap();
      conn.execute("CREATE TABLE hits (n INTEGER)").unwrap();
   }

   let handles: Vec<_> = (0..4)
      .map(|_| {
         let factory = Arc::clone(&factory);
         let cs = cs.clone();
         std::thread::spawn(move || {
            for _ in 0..10 {
               let mut conn = factory.get_connection(&cs).unwrap();
               conn.execute("INSERT INTO hits VALUES (1)").unwrap();
            }
         })
      })
      .collect();
   for handle in handles {
      handle.join().unwrap();
   }

   let mut conn = factory.get_connection(&cs).unwrap();
   assert_eq!(
      conn.query_scalar_i64("SELECT COUNT(*) FROM hits").unwrap(),
      Some(40)
   );
   factory.shutdown();
}

#[test]
fn test_global_factory_round_trip() {
   let dir = tempfile::tempdir().unwrap();
   let cs = file_connection_string(&dir, "global.db");

   let mut conn = Connection::open(&cs).unwrap();
   conn.execute("CREATE TABLE t (x INTEGER)").unwrap();
   conn.execute("INSERT INTO t VALUES (1)").unwrap();
   conn.close();

   let mut conn = Connection::open(&cs).unwrap();
   assert_eq!(conn.query_scalar_i64("SELECT SUM(x) FROM t").unwrap(), Some(1));

   // Leave the global factory usable for other tests; just clear this pool.
   drop(conn);
   ConnectionFactory::global().clear_pool(&cs);
}
