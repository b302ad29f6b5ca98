//! Compile-time defaults, merged by build.rs from library values and an
//! optional user file (`COS_CONFIG_RS`).

include!(concat!(env!("OUT_DIR"), "/cos_merged_config.rs"));
