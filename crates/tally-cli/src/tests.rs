//! CLI command tests
//!
//! This module contains all tests for the CLI commands.

use std::fs;
use std::path::PathBuf;

use tally_core::config::CategoryMap;
use tally_core::db::Database;
use tally_core::models::{CategoryField, MonthKey};
use tempfile::TempDir;

use crate::commands::{self, truncate};

const TEMPLATE_CSV: &str = "交易时间,类型,金额,收支,支付方式,交易对方,商品名称,备注\n\
2024-02-01 09:00:00,住房,2400,支出,银行卡,房东,二月房租,\n\
2024-02-14 20:15:00,餐饮,128.5,支出,微信支付,西餐厅,晚餐,情人节\n";

fn setup_test_db() -> Database {
    Database::in_memory().unwrap()
}

fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

// ========== Helpers ==========

#[test]
fn test_truncate() {
    assert_eq!(truncate("short", 10), "short");
    assert_eq!(truncate("a longer counterparty", 10), "a longe...");
    // Counts characters, not bytes
    assert_eq!(truncate("上海市某某餐饮管理有限公司", 8), "上海市某某...");
}

#[test]
fn test_parse_date_flag() {
    let date = commands::parse_date_flag(Some("2024-02-29"), "--from").unwrap();
    assert_eq!(date.unwrap().to_string(), "2024-02-29");
    assert!(commands::parse_date_flag(None, "--from").unwrap().is_none());
    assert!(commands::parse_date_flag(Some("29/02/2024"), "--from").is_err());
}

// ========== Core Command Tests ==========

#[test]
fn test_open_db_unencrypted_and_init() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("tally.db");

    commands::cmd_init(&db_path, true).unwrap();
    assert!(db_path.exists());

    let db = commands::open_db(&db_path, true).unwrap();
    assert_eq!(db.stats().unwrap().transaction_count, 0);
}

#[test]
fn test_load_categories_from_file() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "categories.toml", "[categories]\n\"房租\" = \"housing\"\n");

    let map = commands::load_categories(Some(&path)).unwrap();
    assert_eq!(map.field_for("房租"), Some(CategoryField::Housing));
}

#[test]
fn test_load_categories_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.toml");
    assert!(commands::load_categories(Some(&path)).is_err());
}

// ========== Parse Command Tests ==========

#[test]
fn test_cmd_parse_writes_canonical_csv() {
    let dir = TempDir::new().unwrap();
    let input = write_file(&dir, "template.csv", TEMPLATE_CSV);
    let out = dir.path().join("canonical.csv");

    commands::cmd_parse(&input, Some(&out), None).unwrap();

    let text = fs::read_to_string(&out).unwrap();
    assert!(text.starts_with('\u{feff}'));
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1], "2024-02-01 09:00:00,住房,2400,支出,银行卡,房东,二月房租,");
}

#[test]
fn test_cmd_parse_without_output() {
    let dir = TempDir::new().unwrap();
    let input = write_file(&dir, "template.csv", TEMPLATE_CSV);
    assert!(commands::cmd_parse(&input, None, Some("standard")).is_ok());
}

#[test]
fn test_cmd_parse_unknown_format_flag() {
    let dir = TempDir::new().unwrap();
    let input = write_file(&dir, "template.csv", TEMPLATE_CSV);
    assert!(commands::cmd_parse(&input, None, Some("paypal")).is_err());
}

#[test]
fn test_cmd_parse_missing_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("nope.csv");
    assert!(commands::cmd_parse(&input, None, None).is_err());
}

// ========== Import/Export Command Tests ==========

#[test]
fn test_cmd_import_template() {
    let db = setup_test_db();
    let dir = TempDir::new().unwrap();
    let input = write_file(&dir, "template.csv", TEMPLATE_CSV);

    commands::cmd_import(&db, CategoryMap::builtin(), &input, None, true, true).unwrap();

    assert_eq!(db.count_transactions().unwrap(), 2);
    let feb = db
        .get_monthly_aggregate(MonthKey::new(2024, 2).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(feb.totals.housing, -2400.0);
    assert_eq!(feb.totals.dining, -128.5);
    assert_eq!(feb.avg_consumption, 2528.5);
}

#[test]
fn test_cmd_import_dedup_flag() {
    let db = setup_test_db();
    let dir = TempDir::new().unwrap();
    let input = write_file(&dir, "template.csv", TEMPLATE_CSV);

    commands::cmd_import(&db, CategoryMap::builtin(), &input, None, true, false).unwrap();
    commands::cmd_import(&db, CategoryMap::builtin(), &input, None, true, false).unwrap();
    assert_eq!(db.count_transactions().unwrap(), 2);

    commands::cmd_import(&db, CategoryMap::builtin(), &input, None, false, false).unwrap();
    assert_eq!(db.count_transactions().unwrap(), 4);
}

#[test]
fn test_cmd_import_template_reports_invalid_rows() {
    let db = setup_test_db();
    let dir = TempDir::new().unwrap();
    let input = write_file(
        &dir,
        "edited.csv",
        "交易时间,类型,金额,收支,支付方式,交易对方,商品名称,备注\n\
2024-02-03 12:00:00,餐饮,-10,支出,,,,\n",
    );

    let result =
        commands::cmd_import(&db, CategoryMap::builtin(), &input, None, true, true).unwrap();

    assert_eq!(result.imported, 0);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.skipped_rows[0].row, 2);
    assert!(result.skipped_rows[0].reason.contains("negative"));
    assert_eq!(db.count_transactions().unwrap(), 0);
}

#[test]
fn test_cmd_import_template_reports_bad_timestamp() {
    let db = setup_test_db();
    let dir = TempDir::new().unwrap();
    let input = write_file(
        &dir,
        "edited.csv",
        "交易时间,类型,金额,收支,支付方式,交易对方,商品名称,备注\n\
someday,餐饮,10,支出,,,,\n\
2024-02-03 12:00:00,餐饮,10,支出,,,,\n",
    );

    let result =
        commands::cmd_import(&db, CategoryMap::builtin(), &input, None, true, false).unwrap();

    assert_eq!(result.imported, 1);
    assert_eq!(result.skipped_rows.len(), 1);
    assert!(result.skipped_rows[0].reason.contains("timestamp"));
}

#[test]
fn test_cmd_import_unparseable_statement() {
    let db = setup_test_db();
    let dir = TempDir::new().unwrap();
    let input = write_file(&dir, "notes.txt", "nothing to see here\n");

    assert!(commands::cmd_import(&db, CategoryMap::builtin(), &input, None, true, false).is_err());
    assert_eq!(db.count_transactions().unwrap(), 0);
}

#[test]
fn test_cmd_export_to_file() {
    let db = setup_test_db();
    let dir = TempDir::new().unwrap();
    let input = write_file(&dir, "template.csv", TEMPLATE_CSV);
    commands::cmd_import(&db, CategoryMap::builtin(), &input, None, true, false).unwrap();

    let out = dir.path().join("export.csv");
    commands::cmd_export(&db, Some("2024-02-10"), None, Some(&out)).unwrap();

    let text = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("2024-02-14 20:15:00,餐饮,128.5,支出"));
}

#[test]
fn test_cmd_export_invalid_date() {
    let db = setup_test_db();
    assert!(commands::cmd_export(&db, Some("Feb 1"), None, None).is_err());
}

// ========== Rebuild Command Tests ==========

#[test]
fn test_cmd_rebuild_from_stored_rows() {
    let db = setup_test_db();
    {
        let conn = db.conn().unwrap();
        conn.execute(
            "INSERT INTO transactions (timestamp, category, amount, direction) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params!["2024-07-03 08:00:00", "交通", 12.0, "expense"],
        )
        .unwrap();
    }

    commands::cmd_rebuild(&db, CategoryMap::builtin(), None, None).unwrap();

    let july = db
        .get_monthly_aggregate(MonthKey::new(2024, 7).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(july.totals.transportation, -12.0);
    assert_eq!(july.balance, -12.0);

    let runs = db.list_rebuild_runs(5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status.as_str(), "completed");
}

#[test]
fn test_cmd_rebuild_scoped() {
    let db = setup_test_db();
    assert!(commands::cmd_rebuild(&db, CategoryMap::builtin(), Some(2024), Some(7)).is_ok());
    assert!(commands::cmd_rebuild(&db, CategoryMap::builtin(), Some(2024), Some(13)).is_err());
    assert!(commands::cmd_rebuild(&db, CategoryMap::builtin(), None, Some(7)).is_err());
    assert!(commands::cmd_rebuild(&db, CategoryMap::builtin(), Some(100_000), None).is_err());
}

// ========== Status Command Tests ==========

#[test]
fn test_cmd_months() {
    let db = setup_test_db();
    assert!(commands::cmd_months(&db).is_ok());

    let dir = TempDir::new().unwrap();
    let input = write_file(&dir, "template.csv", TEMPLATE_CSV);
    commands::cmd_import(&db, CategoryMap::builtin(), &input, None, true, false).unwrap();
    assert!(commands::cmd_months(&db).is_ok());
}

#[test]
fn test_cmd_stats() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("tally.db");

    // Missing database is reported, not an error
    assert!(commands::cmd_stats(&db_path, true).is_ok());

    let db = commands::open_db(&db_path, true).unwrap();
    let input = write_file(&dir, "template.csv", TEMPLATE_CSV);
    commands::cmd_import(&db, CategoryMap::builtin(), &input, None, true, false).unwrap();

    assert!(commands::cmd_stats(&db_path, true).is_ok());
    assert!(commands::print_store_stats(&db).is_ok());
}
