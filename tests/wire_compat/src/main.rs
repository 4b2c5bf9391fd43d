fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chunkup_protocol::messages::{
        CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest, InitUploadResponse,
        UploadChunkHeader, UploadChunkResponse, UploadStatusRequest, UploadStatusResponse,
    };
    use chunkup_protocol::{FileType, Message, MessageType, encode_chunk_frame, parse_chunk_frame};

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    fn as_value(name: &str, json: &str) -> serde_json::Value {
        serde_json::from_str(json).unwrap_or_else(|e| panic!("{name} is not JSON: {e}"))
    }

    /// Parses a fixture into `T`, re-serializes it, and compares the JSON
    /// values (key order does not matter).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = read_fixture(name);
        let parsed: T = serde_json::from_str(&fixture)
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_string(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        let expected = as_value(name, &fixture);
        let actual = as_value(name, &reserialized);
        assert_eq!(
            expected, actual,
            "roundtrip mismatch for {name}:\n  fixture: {expected}\n  ours:    {actual}"
        );
        parsed
    }

    // --- Envelope ---

    #[test]
    fn fixture_message_envelope() {
        let msg: Message = roundtrip_test("message_envelope.json");
        assert_eq!(msg.msg_type, MessageType::InitUpload);
        let req: InitUploadRequest = msg.parse_payload().unwrap().unwrap();
        assert_eq!(req.total_size, 5 * 1024 * 1024);
        assert!(req.checksum.is_none());
    }

    #[test]
    fn fixture_error_envelope() {
        let msg: Message = roundtrip_test("error_envelope.json");
        assert_eq!(msg.msg_type, MessageType::Error);
        assert!(msg.payload.is_none());
        assert_eq!(msg.error.unwrap().code, 422);
    }

    // --- Requests ---

    #[test]
    fn fixture_init_upload_request() {
        let req: InitUploadRequest = roundtrip_test("init_upload_request.json");
        assert_eq!(req.checksum.as_deref().map(str::len), Some(64));
    }

    #[test]
    fn fixture_upload_status_request() {
        roundtrip_test::<UploadStatusRequest>("upload_status_request.json");
    }

    #[test]
    fn fixture_complete_upload_request() {
        roundtrip_test::<CompleteUploadRequest>("complete_upload_request.json");
    }

    // --- Responses ---

    #[test]
    fn fixture_init_upload_response() {
        let resp: InitUploadResponse = roundtrip_test("init_upload_response.json");
        assert_eq!(resp.total_chunks, 11);
    }

    #[test]
    fn fixture_upload_chunk_response() {
        roundtrip_test::<UploadChunkResponse>("upload_chunk_response.json");
    }

    #[test]
    fn fixture_upload_status_response() {
        let resp: UploadStatusResponse = roundtrip_test("upload_status_response.json");
        assert_eq!(resp.received_chunks, vec![0, 2, 4]);
        assert!(!resp.is_complete);
    }

    #[test]
    fn fixture_complete_upload_response() {
        let resp: CompleteUploadResponse = roundtrip_test("complete_upload_response.json");
        assert_eq!(resp.metadata.file_type, FileType::Dataset);
        assert!(resp.downstream_job_id.is_none());
        assert_eq!(resp.hooks.collaborator_errors[0].code, 502);
        assert_eq!(resp.hooks.scan.unwrap().findings.len(), 2);
    }

    #[test]
    fn fixture_complete_upload_response_with_job() {
        let resp: CompleteUploadResponse =
            roundtrip_test("complete_upload_response_with_job.json");
        assert_eq!(resp.metadata.file_type, FileType::ModelArtifact);
        assert_eq!(resp.downstream_job_id.as_deref(), Some("job-42"));
        assert!(resp.hooks.validation.is_none());
    }

    // --- Binary frames ---

    #[test]
    fn fixture_chunk_frame_header() {
        let header: UploadChunkHeader = roundtrip_test("upload_chunk_header.json");
        let payload = b"\x00\x01\x02chunk-bytes";

        let frame = encode_chunk_frame(&header, payload).unwrap();
        let header_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let on_wire = as_value("frame header", std::str::from_utf8(&frame[4..4 + header_len]).unwrap());
        assert_eq!(on_wire, as_value("fixture", &read_fixture("upload_chunk_header.json")));

        let decoded = parse_chunk_frame(&frame).unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(decoded.data, payload);
    }
}
