#![no_main]

use hevc_parser::codec::h265::config_record::DecoderConfigRecord;
use hevc_parser::codec::h265::parser::Parser;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(record) = DecoderConfigRecord::parse(data) else {
        return;
    };

    let mut parser = Parser::default();
    for nalu in record.nalus() {
        let _ = parser.parse_nal(nalu);
    }
});
