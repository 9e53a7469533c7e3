//! Alipay statement parser
//!
//! Alipay exports are GBK-encoded text. A preamble (account, date range) precedes the
//! table, which is fenced by dashed separator lines and followed by a summary footer:
//!
//! ```text
//! 支付宝交易记录明细查询
//! 账号:[user@example.com]
//! ---------------------------------交易记录明细列表------------------------------------
//! 交易号                  ,商户订单号               ,交易创建时间              ,...
//! 2024011522001        ,T2024011501           ,2024-01-15 12:01:02 ,...
//! ------------------------------------------------------------------------------------
//! 共2笔记录
//! ```
//!
//! Cells are padded with whitespace before each comma.

use encoding_rs::GB18030;
use regex::Regex;
use tracing::debug;

use super::{is_separator, Decoded, RawTable};
use crate::error::{Error, Result};

/// Parse an Alipay CSV export
pub fn parse(bytes: &[u8]) -> Result<Decoded> {
    let (text, _, had_errors) = GB18030.decode(bytes);
    if had_errors {
        debug!("Alipay statement contained bytes outside GB18030; replaced");
    }

    let padding = Regex::new(r"\s+,")?;
    let mut opened = false;
    let mut block = Vec::new();

    for line in text.lines() {
        if is_separator(line) {
            if opened {
                break;
            }
            opened = true;
            continue;
        }
        if !opened {
            continue;
        }
        let cleaned = padding.replace_all(line, ",");
        let cleaned = cleaned.trim();
        if !cleaned.is_empty() {
            block.push(cleaned.to_string());
        }
    }

    if !opened {
        return Err(Error::Format(
            "Alipay statement has no dashed separator before the transaction table".to_string(),
        ));
    }
    if block.is_empty() {
        return Err(Error::Format(
            "Alipay statement table between the separators is empty".to_string(),
        ));
    }

    debug!("Alipay block: {} lines including header", block.len());

    Ok(Decoded {
        table: RawTable::from_csv_text(&block.join("\n"))?,
        encoding: "gbk",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gbk(text: &str) -> Vec<u8> {
        GB18030.encode(text).0.into_owned()
    }

    const SAMPLE: &str = "支付宝交易记录明细查询\n\
账号:[user@example.com]\n\
起始日期:[2024-01-01 00:00:00]    终止日期:[2024-02-01 00:00:00]\n\
---------------------------------交易记录明细列表------------------------------------\n\
交易号                  ,商户订单号               ,交易创建时间              ,付款时间                ,最近修改时间              ,交易来源地     ,类型              ,交易对方            ,商品名称                ,金额（元）   ,收/支     ,交易状态    ,服务费（元）   ,成功退款（元）  ,备注                  ,资金状态     ,\n\
2024011522001       ,T001                ,2024-01-15 12:01:02 ,2024-01-15 12:01:03 ,2024-01-15 12:01:03 ,其他（包括阿里巴巴和外部商家）,即时到账交易          ,某餐厅             ,午餐                  ,25.50   ,支出      ,交易成功    ,0.00     ,0.00     ,                    ,已支出      ,\n\
\n\
2024011622002       ,T002                ,2024-01-16 08:00:00 ,                    ,2024-01-16 08:00:00 ,其他（包括阿里巴巴和外部商家）,即时到账交易          ,某商店             ,水杯                  ,12.00   ,支出      ,交易关闭    ,0.00     ,0.00     ,                    ,          ,\n\
------------------------------------------------------------------------------------\n\
共2笔记录\n\
已收入:0笔,0.00元\n";

    #[test]
    fn test_parse_block() {
        let decoded = parse(&gbk(SAMPLE)).unwrap();
        assert_eq!(decoded.encoding, "gbk");

        let table = decoded.table;
        assert_eq!(table.len(), 2);
        assert_eq!(table.headers[2], "交易创建时间");
        // Full-width header variant is folded
        assert!(table.headers.contains(&"金额(元)".to_string()));

        let amount = table.column(&["金额(元)"]).unwrap();
        assert_eq!(table.rows[0][amount], "25.50");
        let counterparty = table.column(&["交易对方"]).unwrap();
        assert_eq!(table.rows[0][counterparty], "某餐厅");
    }

    #[test]
    fn test_footer_is_discarded() {
        let decoded = parse(&gbk(SAMPLE)).unwrap();
        assert!(decoded
            .table
            .rows
            .iter()
            .all(|row| !row[0].starts_with("共")));
    }

    #[test]
    fn test_missing_separator_is_format_error() {
        let err = parse(&gbk("交易号,金额\n1,2\n")).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_empty_block_is_format_error() {
        let text = "header\n------------------------------\n\n------------------------------\n";
        let err = parse(&gbk(text)).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }
}
