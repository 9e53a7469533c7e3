//! Integration tests for tally-core
//!
//! These tests exercise the full detect → parse → import → aggregate workflow.

use chrono::NaiveDate;
use encoding_rs::GB18030;
use tally_core::{
    db::Database,
    detect::detect_format,
    import::Importer,
    models::{ImportRow, MonthKey, RebuildScope, SourceFormat},
    parse::parse_statement,
    AggregationEngine, Error,
};

/// Alipay export with one successful trade, one closed trade and one salary credit
fn alipay_statement() -> Vec<u8> {
    let text = "支付宝交易记录明细查询\n\
账号:[user@example.com]\n\
---------------------------------交易记录明细列表------------------------------------\n\
交易号                  ,商户订单号               ,交易创建时间              ,付款时间                ,最近修改时间              ,交易来源地     ,类型              ,交易对方            ,商品名称                ,金额（元）   ,收/支     ,交易状态    ,服务费（元）   ,成功退款（元）  ,备注                  ,资金状态     ,\n\
2024011522001       ,T001                ,2024-01-15 14:30:00 ,2024-01-15 14:30:01 ,2024-01-15 14:30:01 ,其他,即时到账交易          ,某餐厅             ,午餐                  ,25.50   ,支出      ,交易成功    ,0.00     ,0.00     ,                    ,已支出      ,\n\
2024011622002       ,T002                ,2024-01-16 08:00:00 ,                    ,2024-01-16 08:00:00 ,其他,即时到账交易          ,某商店             ,水杯                  ,12.00   ,支出      ,交易关闭    ,0.00     ,0.00     ,                    ,          ,\n\
2024013122003       ,T003                ,2024-01-31 09:00:00 ,2024-01-31 09:00:00 ,2024-01-31 09:00:00 ,其他,转账                ,某公司             ,一月工资                ,8000.00 ,收入      ,交易成功    ,0.00     ,0.00     ,                    ,已收入      ,\n\
------------------------------------------------------------------------------------\n\
共3笔记录\n";
    GB18030.encode(text).0.into_owned()
}

fn wechat_statement() -> &'static str {
    "\u{feff}微信支付账单明细,,,,,,,,,,\n\
微信昵称：[tester],,,,,,,,,,\n\
----------------------微信支付账单明细列表--------------------,,,,,,,,,,\n\
交易时间,交易类型,交易对方,商品,收/支,金额(元),支付方式,当前状态,交易单号,商户单号,备注\n\
2024-02-03 19:20:00,商户消费,电影院,电影票,支出,¥60.00,零钱,支付成功,4200001,10001,/\n\
2024-02-05 10:00:00,商户消费,某网店,耳机,支出,¥199.00,零钱,已退款(¥199.00),4200002,10002,/\n\
2024-02-06 11:00:00,零钱提现,/,/,/,¥50.00,/,提现已到账,4200003,/,/\n"
}

fn row(time: &str, category: &str, amount: &str, direction: &str) -> ImportRow {
    ImportRow {
        time: time.to_string(),
        category: category.to_string(),
        amount: amount.to_string(),
        direction: direction.to_string(),
        ..Default::default()
    }
}

// =============================================================================
// Parse → Import
// =============================================================================

#[test]
fn test_alipay_statement_to_aggregates() {
    let db = Database::in_memory().expect("Failed to create in-memory database");

    let parsed = parse_statement(&alipay_statement(), Some("alipay_record_202401.csv"))
        .expect("Failed to parse statement");
    assert_eq!(parsed.details.format, SourceFormat::Alipay);
    assert_eq!(parsed.details.raw_rows, 3);
    assert_eq!(parsed.details.normalized_rows, 2);
    assert_eq!(parsed.details.dropped_rows, 1);

    // Platform statements carry no category; the user fills it in before importing
    let rows: Vec<ImportRow> = parsed
        .rows
        .iter()
        .map(|r| {
            let mut row = r.to_import_row();
            row.category = if row.direction == "收入" { "工资" } else { "餐饮" }.to_string();
            row
        })
        .collect();

    let result = Importer::new(&db).import_rows(&rows).unwrap();
    assert_eq!(result.imported, 2);
    assert_eq!(result.aggregation.processed_months, 1);

    let jan = db
        .get_monthly_aggregate(MonthKey::new(2024, 1).unwrap())
        .unwrap()
        .expect("January aggregate should exist");
    assert_eq!(jan.totals.dining, -25.5);
    assert_eq!(jan.totals.salary, 8000.0);
    assert_eq!(jan.balance, 7974.5);
    assert_eq!(jan.avg_consumption, 25.5);

    let tx = &db.list_transactions(None, None).unwrap()[1];
    assert_eq!(tx.payment_method.as_deref(), Some("支付宝"));
    assert_eq!(tx.counterparty.as_deref(), Some("某餐厅"));
}

#[test]
fn test_uncategorized_platform_rows_are_skipped_with_reason() {
    let db = Database::in_memory().unwrap();
    let parsed = parse_statement(wechat_statement().as_bytes(), Some("微信支付账单.csv")).unwrap();
    assert_eq!(parsed.details.format, SourceFormat::Wechat);
    assert_eq!(parsed.details.normalized_rows, 2);

    let csv = parsed.to_canonical_csv().unwrap();
    assert!(csv.starts_with('\u{feff}'));
    assert!(csv.contains("已退款(¥199.00)"));

    let result = Importer::new(&db).import_csv(&csv).unwrap();
    assert_eq!(result.imported, 0);
    assert_eq!(result.skipped, 2);
    assert!(result
        .skipped_rows
        .iter()
        .all(|d| d.reason.contains("category")));
}

#[test]
fn test_generic_template_imports_directly() {
    let db = Database::in_memory().unwrap();
    let template = "交易时间,类型,金额,收支,支付方式,交易对方,商品名称,备注\n\
2024-03-01 10:00:00,住房,3000,支出,银行卡,房东,三月房租,\n\
2024-03-02 12:00:00,餐饮,35.5,支出,微信支付,面馆,午餐,\n";

    assert_eq!(detect_format(template.as_bytes(), None), SourceFormat::Standard);
    let parsed = parse_statement(template.as_bytes(), Some("template.csv")).unwrap();
    let result = Importer::new(&db)
        .import_csv(&parsed.to_canonical_csv().unwrap())
        .unwrap();
    assert_eq!(result.imported, 2);

    let march = db
        .get_monthly_aggregate(MonthKey::new(2024, 3).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(march.totals.housing, -3000.0);
    assert_eq!(march.avg_consumption, 3035.5);
}

// =============================================================================
// Importer Properties
// =============================================================================

#[test]
fn test_export_then_reimport_is_all_duplicates() {
    let db = Database::in_memory().unwrap();
    let rows = vec![
        row("2024-01-15 14:30:00", "餐饮", "25.50", "支出"),
        row("2024-01-20 08:15:00", "交通", "4", "支出"),
        row("2024-01-31 09:00:00", "工资", "8000", "收入"),
        row("2024-02-01 09:00:00", "餐饮", "10", "支出"),
    ];
    Importer::new(&db).import_rows(&rows).unwrap();

    let january = db
        .export_canonical_csv(
            NaiveDate::from_ymd_opt(2024, 1, 1),
            NaiveDate::from_ymd_opt(2024, 1, 31),
        )
        .unwrap();

    let result = Importer::new(&db).import_csv(&january).unwrap();
    assert_eq!(result.imported, 0);
    assert_eq!(result.duplicate, 3);
    assert_eq!(db.count_transactions().unwrap(), 4);
}

#[test]
fn test_identical_row_imported_twice() {
    let db = Database::in_memory().unwrap();
    let mut lunch = row("2024-01-15 14:30:00", "餐饮", "25.50", "支出");
    lunch.counterparty = "某餐厅".to_string();
    lunch.item = "午餐".to_string();

    let first = Importer::new(&db).import_rows(&[lunch.clone()]).unwrap();
    assert_eq!(first.imported, 1);

    let second = Importer::new(&db).import_rows(&[lunch]).unwrap();
    assert_eq!(second.imported, 0);
    assert_eq!(second.duplicate, 1);
}

#[test]
fn test_negative_amount_is_skipped() {
    let db = Database::in_memory().unwrap();
    let result = Importer::new(&db)
        .import_rows(&[row("2024-01-15 14:30:00", "餐饮", "-10", "支出")])
        .unwrap();

    assert_eq!(result.imported, 0);
    assert_eq!(result.skipped, 1);
    assert!(result.skipped_rows[0].reason.contains("amount"));
}

#[test]
fn test_amounts_stored_as_magnitudes() {
    let db = Database::in_memory().unwrap();
    let parsed = parse_statement(
        "交易时间,类型,金额,收支\n2024-05-01 10:00:00,餐饮,-18.8,支出\n".as_bytes(),
        None,
    )
    .unwrap();
    let rows: Vec<ImportRow> = parsed.rows.iter().map(|r| r.to_import_row()).collect();
    Importer::new(&db).import_rows(&rows).unwrap();

    let tx = &db.list_transactions(None, None).unwrap()[0];
    assert_eq!(tx.amount, 18.8);

    let may = db
        .get_monthly_aggregate(MonthKey::new(2024, 5).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(may.totals.dining, -18.8);
}

// =============================================================================
// Aggregation Properties
// =============================================================================

#[test]
fn test_rebuild_idempotent_after_import() {
    let db = Database::in_memory().unwrap();
    Importer::new(&db)
        .import_rows(&[
            row("2023-12-01 10:00:00", "住房", "2500", "支出"),
            row("2024-01-05 12:00:00", "餐饮", "40", "支出"),
            row("2024-02-05 12:00:00", "娱乐", "120", "支出"),
            row("2024-02-10 09:00:00", "工资", "9000", "收入"),
        ])
        .unwrap();

    let snapshot = |db: &Database| -> Vec<(String, f64, f64, f64)> {
        db.list_monthly_aggregates()
            .unwrap()
            .iter()
            .map(|a| {
                (
                    a.month_key.to_string(),
                    a.balance,
                    a.avg_consumption,
                    a.recent_avg_consumption,
                )
            })
            .collect()
    };

    let before = snapshot(&db);
    let result = AggregationEngine::new(&db).rebuild(RebuildScope::All).unwrap();
    assert_eq!(result.created, 0);
    assert_eq!(result.updated, 3);
    assert_eq!(snapshot(&db), before);

    // 2500 housing spread over three months
    let expected_avg = [2500.0 / 3.0, 40.0 + 2500.0 / 3.0, 120.0 + 2500.0 / 3.0];
    for ((_, _, avg, _), expected) in before.iter().zip(expected_avg) {
        assert!((avg - expected).abs() < 1e-9);
    }
}

#[test]
fn test_stats_after_import() {
    let db = Database::in_memory().unwrap();
    Importer::new(&db)
        .import_rows(&[
            row("2024-01-05 12:00:00", "餐饮", "40", "支出"),
            row("2024-03-05 12:00:00", "餐饮", "20", "支出"),
        ])
        .unwrap();

    let stats = db.stats().unwrap();
    assert_eq!(stats.transaction_count, 2);
    assert_eq!(stats.aggregate_count, 2);
    assert_eq!(
        stats.earliest_ts.unwrap().to_string(),
        "2024-01-05 12:00:00"
    );
}

// =============================================================================
// Format Errors
// =============================================================================

#[test]
fn test_spreadsheet_signature_routes_to_spreadsheet_parser() {
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.extend_from_slice(b"not really a workbook");

    // Filename says CSV, content says spreadsheet
    assert_eq!(
        detect_format(&bytes, Some("alipay_record.csv")),
        SourceFormat::WechatXlsx
    );

    let err = parse_statement(&bytes, Some("alipay_record.csv")).unwrap_err();
    assert!(matches!(err, Error::Format(_)));
}

#[test]
fn test_format_error_persists_nothing() {
    let db = Database::in_memory().unwrap();
    let garbage = "----------------------微信支付账单明细列表--------------------\n\
交易时间,收/支,金额(元)\n\
昨天,支出,¥1\n";

    let err = parse_statement(garbage.as_bytes(), Some("微信支付账单.csv")).unwrap_err();
    assert!(matches!(err, Error::Format(_)));
    assert_eq!(db.count_transactions().unwrap(), 0);
}
