// Time and date utilities that use libc to avoid pulling in Chrono.  These panic on errors, there
// should never be any.
//
// NOTE: According to the web, localtime_r() is not required to initialize time zone information,
// and tzset() should be called before using it (at least once).  So far it seems we've not needed
// to do this.

use crate::util::cstrdup;

use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time precedes epoch")
        .as_secs()
}

// Get current time as an ISO time stamp: yyyy-mm-ddThh:mm:ss+hh:mm
//
//   t = time()
//   localtime_r(&t, timebuf)
//   strftime(strbuf, strbufsize, "%FT%T%z", timebuf)

pub fn now_iso8601() -> String {
    format_iso8601(&now_local())
}

fn empty_tm() -> libc::tm {
    libc::tm {
        tm_sec: 0,
        tm_min: 0,
        tm_hour: 0,
        tm_mday: 0,
        tm_mon: 0,
        tm_year: 0,
        tm_wday: 0,
        tm_yday: 0,
        tm_isdst: 0,
        tm_gmtoff: 0,
        tm_zone: std::ptr::null(),
    }
}

// The tm that is returned here may have a non-null tm_zone but if so that should point to static
// data.

pub fn now_local() -> libc::tm {
    let mut timebuf = empty_tm();
    unsafe {
        let t = libc::time(std::ptr::null_mut());
        if libc::localtime_r(&t, &mut timebuf).is_null() {
            panic!("localtime_r");
        }
    }
    timebuf
}

pub fn format_iso8601(timebuf: &libc::tm) -> String {
    const SIZE: usize = 32; // We need 25 unless something is greatly off
    let mut buffer = vec![0 as cty::c_char; SIZE];
    let s = unsafe {
        if libc::strftime(buffer.as_mut_ptr(), SIZE, c"%FT%T%z".as_ptr(), timebuf) == 0 {
            panic!("strftime");
        }
        cstrdup(&buffer)
    };

    // We have +/-hhmm for the time zone but want +/-hh:mm.  strftime() won't do that for us, so
    // fix up the string, leaving it alone if the sign isn't where we expect it.
    let bs = s.as_bytes();
    if bs.len() >= 5 && (bs[bs.len() - 5] == b'+' || bs[bs.len() - 5] == b'-') {
        format!("{}:{}", &s[..s.len() - 2], &s[s.len() - 2..])
    } else {
        s
    }
}

// The values returned are year, month, day, hour, minute, second, where month, day, hour, minute,
// second are all zero-based.  This iterates up from 1970 and is slowish, but we only need it once
// per flush.

pub fn unix_time_components(t: u64) -> (u64, u64, u64, u64, u64, u64) {
    const SECONDS_PER_MINUTE: u64 = 60;
    const SECONDS_PER_HOUR: u64 = 60 * SECONDS_PER_MINUTE;
    const SECONDS_PER_DAY: u64 = 24 * SECONDS_PER_HOUR;

    let mut days = t / SECONDS_PER_DAY;
    let mut year = 1970;
    loop {
        let n = if is_leap_year(year) { 366 } else { 365 };
        if days < n {
            break;
        }
        days -= n;
        year += 1;
    }

    let days_per_month = [
        31,
        if is_leap_year(year) { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ];
    let mut month = 0;
    loop {
        let n = days_per_month[month as usize];
        if days < n {
            break;
        }
        days -= n;
        month += 1;
    }

    let seconds_remaining = t % SECONDS_PER_DAY;
    let hour = seconds_remaining / SECONDS_PER_HOUR;
    let minute = seconds_remaining / SECONDS_PER_MINUTE % SECONDS_PER_MINUTE;
    let second = seconds_remaining % SECONDS_PER_MINUTE;

    (year, month, days, hour, minute, second)
}

// Relative path yyyy/mm/dd (one-based month and day) for the UTC date at `t`.
pub fn date_path(t: u64) -> String {
    let (yyyy, mz, dz, _, _, _) = unix_time_components(t);
    format!("{}/{:02}/{:02}", yyyy, mz + 1, dz + 1)
}

fn is_leap_year(year: u64) -> bool {
    year % 400 == 0 || (year % 4 == 0 && year % 100 != 0)
}

// This also tests now_local() and format_iso8601
#[test]
pub fn test_now_iso8601() {
    let t = now_iso8601();
    let ts = t.as_str().chars().collect::<Vec<char>>();
    let expect = "dddd-dd-ddTdd:dd:dd+dd:dd";
    let mut i = 0;
    for c in expect.chars() {
        match c {
            'd' => {
                assert!(ts[i] >= '0' && ts[i] <= '9');
            }
            '+' => {
                assert!(ts[i] == '+' || ts[i] == '-');
            }
            _ => {
                assert!(ts[i] == c);
            }
        }
        i += 1;
    }
    assert!(i == ts.len());
}

#[test]
pub fn test_unix_time_components() {
    // 08/18/2016 @ 2:41am (UTC)
    let (year, month, day, hour, minute, second) = unix_time_components(1471488076);
    assert!(year == 2016);
    assert!(month == 7);
    assert!(day == 17);
    assert!(hour == 2);
    assert!(minute == 41);
    assert!(second == 16);

    let (year, month, day, hour, minute, second) = unix_time_components(0);
    assert!(year == 1970);
    assert!(month == 0);
    assert!(day == 0);
    assert!(hour == 0);
    assert!(minute == 0);
    assert!(second == 0);
}

#[test]
pub fn test_date_path() {
    // 1740568588-2025-02-26T11:16:28
    assert!(date_path(1740568588) == "2025/02/26");
    assert!(date_path(0) == "1970/01/01");
}
