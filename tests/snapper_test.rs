// ABOUTME: End-to-end tests of the snapshot orchestrator against an in-memory source
// ABOUTME: Covers bracketing, filtering, transformation, compression, definers and aborts

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use db_snapper::column::ColumnMeta;
use db_snapper::connection::ConnectionParams;
use db_snapper::events::{listener, EventKind, SnapEvent};
use db_snapper::filter::where_fn;
use db_snapper::snapper::{SnapState, Snapper};
use db_snapper::source::{MemorySource, ObjectKind};
use db_snapper::transform::redact;
use db_snapper::value::CellValue;
use db_snapper::{SnapError, SnapperConfig};
use flate2::read::GzDecoder;

fn config(dir: &Path) -> SnapperConfig {
    SnapperConfig::new(ConnectionParams::tcp("localhost", 3306, "root", None, "shop"))
        .with_output_dir(dir)
        .with_dump_date(false)
}

fn users_rows() -> Vec<Vec<CellValue>> {
    (1..=6)
        .map(|id| {
            vec![
                CellValue::Int(id),
                CellValue::from(format!("user{}", id)),
                if id == 4 {
                    CellValue::Null
                } else {
                    CellValue::from(format!("+1 555 010{}", id))
                },
                CellValue::Bytes(vec![0xde, 0xad, id as u8]),
                CellValue::from(format!("USER{}", id)),
            ]
        })
        .collect()
}

fn fixture() -> MemorySource {
    MemorySource::new("shop")
        .with_table(
            "users",
            vec![
                ColumnMeta::new("id", "int(11)", "auto_increment"),
                ColumnMeta::new("name", "varchar(64)", ""),
                ColumnMeta::new("phone", "varchar(32)", ""),
                ColumnMeta::new("avatar", "blob", ""),
                ColumnMeta::new("name_upper", "varchar(64)", "VIRTUAL GENERATED"),
            ],
            users_rows(),
            "CREATE TABLE `users` (\n  `id` int(11) NOT NULL AUTO_INCREMENT,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB",
        )
        .with_table(
            "audit_log",
            vec![
                ColumnMeta::new("id", "bigint(20) unsigned", ""),
                ColumnMeta::new("message", "text", ""),
            ],
            Vec::new(),
            "CREATE TABLE `audit_log` (`id` bigint(20) unsigned, `message` text)",
        )
        .with_object(
            ObjectKind::View,
            "active_users",
            "CREATE ALGORITHM=UNDEFINED DEFINER=`root`@`localhost` SQL SECURITY DEFINER VIEW `active_users` AS select `id` from `users`",
        )
        .with_object(
            ObjectKind::Trigger,
            "users_bi",
            "CREATE DEFINER=`admin`@`%` TRIGGER `users_bi` BEFORE INSERT ON `users` FOR EACH ROW SET NEW.name = TRIM(NEW.name)",
        )
        .with_object(
            ObjectKind::Function,
            "greeting",
            "CREATE DEFINER=`admin`@`%` FUNCTION `greeting`(n varchar(64)) RETURNS varchar(80) DETERMINISTIC RETURN CONCAT('hi ', n)",
        )
        .with_object(
            ObjectKind::Procedure,
            "purge_audit",
            "CREATE DEFINER=`ops`@`10.0.0.%` PROCEDURE `purge_audit`()\nBEGIN\n  DELETE FROM audit_log;\nEND",
        )
}

fn recorder(events: &Arc<Mutex<Vec<SnapEvent>>>) -> db_snapper::events::Listener {
    let events = Arc::clone(events);
    listener(move |event| {
        events.lock().unwrap().push(event.clone());
        Ok(())
    })
}

#[tokio::test]
async fn test_empty_table_gets_bracketing_without_insert() {
    let dir = tempfile::tempdir().unwrap();
    let mut snapper = Snapper::new(config(dir.path())).unwrap();
    let summary = snapper.snap(&mut fixture()).await.unwrap();
    let content = fs::read_to_string(&summary.path).unwrap();

    assert!(content.contains(
        "LOCK TABLES `audit_log` WRITE;\n\
         /*!40000 ALTER TABLE `audit_log` DISABLE KEYS */;\n\
         SET autocommit=0;\n\
         /*!40000 ALTER TABLE `audit_log` ENABLE KEYS */;\n\
         UNLOCK TABLES;\n\
         COMMIT;\n\
         SET autocommit=1;\n"
    ));
    assert!(!content.contains("INSERT INTO `audit_log`"));
}

#[tokio::test]
async fn test_rows_go_into_one_insert() {
    let dir = tempfile::tempdir().unwrap();
    let mut snapper = Snapper::new(config(dir.path())).unwrap();
    let summary = snapper.snap(&mut fixture()).await.unwrap();
    let content = fs::read_to_string(&summary.path).unwrap();

    assert_eq!(content.matches("INSERT INTO `users`").count(), 1);
    assert_eq!(summary.rows, 6);
    assert_eq!(summary.tables, 2);

    // Virtual column left out, blob as hex, NULL bare, strings quoted
    let insert_start = content.find("INSERT INTO `users`").unwrap();
    let insert = &content[insert_start..];
    let insert = &insert[..insert.find(";\n").unwrap() + 1];
    assert!(insert.starts_with(
        "INSERT INTO `users` (`id`, `name`, `phone`, `avatar`) VALUES\n\
         (1,'user1','+1 555 0101',0xdead01),\n"
    ));
    assert!(insert.contains("\n(4,'user4',NULL,0xdead04),\n"));
    assert!(insert.ends_with("(6,'user6','+1 555 0106',0xdead06);"));
    assert_eq!(insert.matches("\n(").count(), 6);
    assert!(!insert.contains("USER1"));

    let bracket_end = content[insert_start..].find("UNLOCK TABLES;").unwrap();
    assert!(content[insert_start..insert_start + bracket_end].contains("ENABLE KEYS"));
}

#[tokio::test]
async fn test_table_override_wins_and_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let config = config(dir.path())
        .with_default_where("id < 100")
        .with_where("users", "phone IS NOT NULL\n   AND id > 1");
    let mut snapper = Snapper::new(config).unwrap();
    snapper.on(EventKind::DumpingTableData, recorder(&events));

    let mut source = fixture();
    snapper.snap(&mut source).await.unwrap();

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            SnapEvent::DumpingTableData {
                table: "users".into(),
                where_clause: "phone IS NOT NULL AND id > 1".into(),
            },
            SnapEvent::DumpingTableData {
                table: "audit_log".into(),
                where_clause: "id < 100".into(),
            },
        ]
    );
    assert_eq!(
        source.queries()[0],
        "SELECT `id`, `name`, `phone`, `avatar` FROM `users` WHERE phone IS NOT NULL AND id > 1"
    );
}

#[tokio::test]
async fn test_redaction_applies_to_dumped_rows() {
    let dir = tempfile::tempdir().unwrap();
    let config =
        config(dir.path()).with_row_transformer("users", redact(&["phone"], "000-REDACTED"));
    let mut snapper = Snapper::new(config).unwrap();
    let summary = snapper.snap(&mut fixture()).await.unwrap();
    let content = fs::read_to_string(&summary.path).unwrap();

    assert_eq!(content.matches("'000-REDACTED'").count(), 6);
    assert!(content.contains("(4,'user4','000-REDACTED',0xdead04)"));
    assert!(!content.contains("+1 555"));
}

#[tokio::test]
async fn test_compressed_output_matches_plain() {
    let dir = tempfile::tempdir().unwrap();

    let mut plain = Snapper::new(config(dir.path())).unwrap();
    let plain_path = plain.snap(&mut fixture()).await.unwrap().path;

    let mut gz = Snapper::new(config(dir.path()).with_compress(true)).unwrap();
    let gz_path = gz.snap(&mut fixture()).await.unwrap().path;

    assert_eq!(plain_path.extension().unwrap(), "sql");
    assert_eq!(gz_path.extension().unwrap(), "gz");

    let mut decoded = Vec::new();
    GzDecoder::new(File::open(&gz_path).unwrap())
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, fs::read(&plain_path).unwrap());
}

#[tokio::test]
async fn test_definers_are_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let mut snapper = Snapper::new(config(dir.path())).unwrap();
    let summary = snapper.snap(&mut fixture()).await.unwrap();
    let content = fs::read_to_string(&summary.path).unwrap();

    assert!(content.contains(
        "DROP TRIGGER IF EXISTS `users_bi`;\n\
         DELIMITER ;;\n\
         CREATE DEFINER=CURRENT_USER TRIGGER `users_bi` BEFORE INSERT ON `users` FOR EACH ROW SET NEW.name = TRIM(NEW.name);;\n\
         DELIMITER ;\n"
    ));
    assert!(content.contains(
        "CREATE DEFINER=CURRENT_USER PROCEDURE `purge_audit`()\nBEGIN\n  DELETE FROM audit_log;\nEND;;\n"
    ));
    assert!(content.contains("CREATE DEFINER=CURRENT_USER FUNCTION `greeting`"));
    assert!(content.contains(
        "CREATE ALGORITHM=UNDEFINED DEFINER=CURRENT_USER SQL SECURITY DEFINER VIEW `active_users`"
    ));
    assert!(!content.contains("`admin`@"));
    assert!(!content.contains("`ops`@"));
}

#[tokio::test]
async fn test_failing_where_aborts_and_closes_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path())
        .with_where("audit_log", where_fn(|_| anyhow::bail!("retention service down")));
    let mut snapper = Snapper::new(config).unwrap();

    let mut source = fixture();
    let err = snapper.snap(&mut source).await.unwrap_err();
    assert!(matches!(err, SnapError::Hook { .. }));
    assert!(err.to_string().contains("where[audit_log]"));
    assert_eq!(snapper.state(), SnapState::Aborted);

    // The handle is released: the file reads back and holds nothing of the failed table
    let path = dir.path().join("shop.sql");
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("INSERT INTO `users`"));
    assert!(!content.contains("LOCK TABLES `audit_log`"));
    assert!(!content.contains("SET FOREIGN_KEY_CHECKS=@OLD_FOREIGN_KEY_CHECKS;"));
    fs::remove_file(&path).unwrap();

    // Only the users query ran
    assert_eq!(source.queries().len(), 1);
}

#[tokio::test]
async fn test_lifecycle_hooks_see_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let extra = dir.path().join("post.sql");
    fs::write(&extra, "UPDATE `users` SET `name` = 'x';\n").unwrap();

    let mut config = config(dir.path()).with_append(&extra);
    for kind in EventKind::ALL {
        config = config.with_hook(kind, recorder(&events));
    }
    let mut snapper = Snapper::new(config).unwrap();
    let summary = snapper.snap(&mut fixture()).await.unwrap();

    let kinds: Vec<EventKind> = events.lock().unwrap().iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Snapping,
            EventKind::CreatingSnapFile,
            EventKind::DumpingSchema,
            EventKind::DumpingTableDdl,
            EventKind::DumpingTableDdl,
            EventKind::DumpingViews,
            EventKind::DumpingView,
            EventKind::DumpingData,
            EventKind::DumpingTableData,
            EventKind::TableDumped,
            EventKind::DumpingTableData,
            EventKind::TableDumped,
            EventKind::DumpingActions,
            EventKind::DumpingTriggers,
            EventKind::DumpingTrigger,
            EventKind::DumpingFunctions,
            EventKind::DumpingFunction,
            EventKind::DumpingProcedures,
            EventKind::DumpingProcedure,
            EventKind::Appending,
            EventKind::Appended,
            EventKind::Snapped,
        ]
    );

    let events = events.lock().unwrap();
    assert!(events.contains(&SnapEvent::Appended {
        path: extra.clone(),
        bytes: 33,
    }));
    match &events[9] {
        SnapEvent::TableDumped { table, rows, .. } => {
            assert_eq!(table, "users");
            assert_eq!(*rows, 6);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let content = fs::read_to_string(&summary.path).unwrap();
    let appended = content.find("UPDATE `users` SET `name` = 'x';").unwrap();
    assert!(appended > content.find("CREATE DEFINER=CURRENT_USER PROCEDURE").unwrap());
}

#[tokio::test]
async fn test_hooks_are_detached_after_each_run() {
    let dir = tempfile::tempdir().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let config = config(dir.path()).with_hook(EventKind::Snapped, recorder(&events));
    let mut snapper = Snapper::new(config).unwrap();

    snapper.snap(&mut fixture()).await.unwrap();
    snapper.snap(&mut fixture()).await.unwrap();

    // One registration per run, never accumulated
    assert_eq!(events.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_failing_listener_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let mut snapper = Snapper::new(config(dir.path())).unwrap();
    snapper.on(
        EventKind::DumpingViews,
        listener(|_| anyhow::bail!("dashboard unreachable")),
    );

    let err = snapper.snap(&mut fixture()).await.unwrap_err();
    assert!(err.is_hook());
    assert!(err.to_string().contains("dashboard unreachable"));
    assert_eq!(snapper.state(), SnapState::Aborted);
}

#[tokio::test]
async fn test_data_only_skips_ddl_and_routines() {
    let dir = tempfile::tempdir().unwrap();
    let mut snapper = Snapper::new(config(dir.path()).data_only()).unwrap();
    let summary = snapper.snap(&mut fixture()).await.unwrap();
    let content = fs::read_to_string(&summary.path).unwrap();

    assert!(!content.contains("CREATE TABLE"));
    assert!(!content.contains("CREATE DEFINER"));
    assert!(!content.contains("DELIMITER"));
    assert!(content.contains("INSERT INTO `users`"));
}

#[tokio::test]
async fn test_header_and_footer() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path())
        .with_charset("utf8mb4")
        .with_collation("utf8mb4_unicode_ci");
    let mut snapper = Snapper::new(config).unwrap();
    let summary = snapper.snap(&mut fixture()).await.unwrap();
    let content = fs::read_to_string(&summary.path).unwrap();

    assert!(content.starts_with("-- db-snapper "));
    assert!(content.contains("-- Database: shop\n"));
    assert!(!content.contains("Generated:"));
    assert!(content.contains("SET NAMES utf8mb4 COLLATE utf8mb4_unicode_ci;\n"));
    assert!(content.contains("FOREIGN_KEY_CHECKS=0;"));
    assert!(content.contains("SET @OLD_TIME_ZONE=@@TIME_ZONE, TIME_ZONE='+00:00';\n"));
    assert!(content.contains("SET @OLD_SQL_MODE=@@SQL_MODE, SQL_MODE='NO_AUTO_VALUE_ON_ZERO';\n"));
    assert!(content.ends_with(
        "SET SQL_MODE=@OLD_SQL_MODE;\n\
         SET FOREIGN_KEY_CHECKS=@OLD_FOREIGN_KEY_CHECKS;\n\
         SET UNIQUE_CHECKS=@OLD_UNIQUE_CHECKS;\n\
         SET TIME_ZONE=@OLD_TIME_ZONE;\n\
         \n\
         -- Snapshot completed\n"
    ));

    let header_end = content.find("SQL_MODE='NO_AUTO_VALUE_ON_ZERO';").unwrap();
    assert!(header_end < content.find("DROP TABLE IF EXISTS `users`;").unwrap());
}

#[tokio::test]
async fn test_appended_statements_run_with_autocommit() {
    let dir = tempfile::tempdir().unwrap();
    let extra = dir.path().join("settings.sql");
    fs::write(&extra, "UPDATE `settings` SET `value` = 'staging';\n").unwrap();

    let mut snapper = Snapper::new(config(dir.path()).with_append(&extra)).unwrap();
    let summary = snapper.snap(&mut fixture()).await.unwrap();
    let content = fs::read_to_string(&summary.path).unwrap();

    // Every table block switches autocommit back on before anything follows it
    assert_eq!(
        content.matches("SET autocommit=0;").count(),
        content.matches("COMMIT;\nSET autocommit=1;\n").count()
    );
    let last_off = content.rfind("SET autocommit=0;").unwrap();
    let last_on = content.rfind("SET autocommit=1;").unwrap();
    let update = content.find("UPDATE `settings`").unwrap();
    assert!(last_off < last_on && last_on < update);
}
