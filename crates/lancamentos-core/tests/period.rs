use chrono::{NaiveDate, NaiveDateTime};
use lancamentos_core::dimensions::derive_time_rows;
use lancamentos_core::period::Period;

fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32, micro: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_micro_opt(h, min, s, micro)
        .unwrap()
}

#[test]
fn parses_month_year_text() {
    assert_eq!("03/2024".parse::<Period>().unwrap(), Period { year: 2024, month: 3 });
    assert_eq!("3/2024".parse::<Period>().unwrap(), Period { year: 2024, month: 3 });
    assert_eq!(" 12/1999 ".parse::<Period>().unwrap(), Period { year: 1999, month: 12 });
}

#[test]
fn rejects_malformed_periods() {
    for value in ["13/2024", "00/2024", "2024-03", "03/24", "03-2024", "mar/2024", "", "/2024", "003/2024"] {
        let err = value.parse::<Period>().unwrap_err();
        assert_eq!(err.value, value, "error should carry the raw value");
    }
}

#[test]
fn time_row_for_march_2024() {
    let row = Period { year: 2024, month: 3 }.time_row();
    assert_eq!(row.year, 2024);
    assert_eq!(row.month, 3);
    assert_eq!(row.week, 9);
    assert_eq!(row.period_start, at(2024, 3, 1, 0, 0, 0, 0));
    assert_eq!(row.period_end, at(2024, 3, 31, 23, 59, 59, 999_999));
}

#[test]
fn leap_february_and_december_rollover() {
    let february = Period { year: 2024, month: 2 }.time_row();
    assert_eq!(february.period_end, at(2024, 2, 29, 23, 59, 59, 999_999));

    let december = Period { year: 2023, month: 12 }.time_row();
    assert_eq!(december.period_start, at(2023, 12, 1, 0, 0, 0, 0));
    assert_eq!(december.period_end, at(2023, 12, 31, 23, 59, 59, 999_999));
}

#[test]
fn iso_week_of_first_day_can_belong_to_previous_year() {
    // 2021-01-01 is a Friday in ISO week 53 of 2020.
    assert_eq!(Period { year: 2021, month: 1 }.iso_week(), 53);
    // 2024-01-01 is a Monday.
    assert_eq!(Period { year: 2024, month: 1 }.iso_week(), 1);
}

#[test]
fn derive_time_rows_deduplicates_and_orders() {
    let periods = ["04/2024", "03/2024", "3/2024", " 04/2024"];
    let rows = derive_time_rows(&periods).unwrap();
    let keys: Vec<(i32, u32)> = rows.iter().map(|row| (row.year, row.month)).collect();
    assert_eq!(keys, vec![(2024, 3), (2024, 4)]);
}

#[test]
fn derive_time_rows_fails_on_any_malformed_period() {
    let err = derive_time_rows(&["03/2024", "13/2024"]).unwrap_err();
    assert_eq!(err.value, "13/2024");
}

#[test]
fn display_is_zero_padded() {
    assert_eq!(Period { year: 2024, month: 3 }.to_string(), "03/2024");
}
