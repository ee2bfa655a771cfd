#![no_main]

use hevc_parser::codec::h265::nalu::NaluIterator;
use hevc_parser::codec::h265::parser::Parser;
use hevc_parser::codec::h265::profile::Profile;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut parser = Parser::default();

    for nalu in NaluIterator::new(data) {
        let _ = parser.parse_nal(&nalu);

        if nalu.header.type_.is_slice() {
            let _ = parser.parse_slice_header(&nalu);
        } else {
            let _ = parser.parse_sei(&nalu);
        }
    }

    if let Some(sps) = parser.store().last_sps() {
        let _ = Profile::from_sps(sps);
    }
});
