use crate::attribute::{AttrEntry, Permission};
use crate::error::{BatchError, Result};
use crate::select::{Criterion, Op, QueryKind, Requester, SelectRequest};
use crate::wire::attropl::{decode_attr_list, encode_attr_list};
use crate::wire::dis::{DisReader, DisWriter};

pub const PROTOCOL_TYPE: u64 = 2;
pub const PROTOCOL_VERSION: u64 = 2;

pub const REQ_SELECT_JOBS: u64 = 16;
pub const REQ_SELECT_STATUS: u64 = 51;

pub const EXTEND_EXEC_QUEUE_ONLY: &str = "exec_queue_only";
pub const EXTEND_SUMMARIZE_ARRAYS: &str = "summarize_arrays";

fn criterion_entry(c: &Criterion) -> AttrEntry {
    AttrEntry {
        name: c.name.clone(),
        resource: c.resource.clone(),
        value: c.value.clone(),
        op: c.op.code(),
    }
}

fn entry_criterion(index: usize, e: AttrEntry) -> Result<Criterion> {
    let op = Op::from_code(e.op).ok_or_else(|| {
        BatchError::InvalidRequest(format!("unknown operator code {}", e.op)).at_criterion(index)
    })?;
    Ok(Criterion {
        name: e.name,
        resource: e.resource,
        value: e.value,
        op,
    })
}

fn extension(request: &SelectRequest) -> String {
    let mut flags = Vec::new();
    if request.exec_queue_only {
        flags.push(EXTEND_EXEC_QUEUE_ONLY);
    }
    if request.summarize_arrays {
        flags.push(EXTEND_SUMMARIZE_ARRAYS);
    }
    flags.join(",")
}

/// Encode a select request: header (protocol, version, request type,
/// requester), the criteria as an attribute list, then the extension string.
pub fn encode_select_request(request: &SelectRequest) -> Vec<u8> {
    let mut w = DisWriter::new();
    w.write_uint(PROTOCOL_TYPE);
    w.write_uint(PROTOCOL_VERSION);
    w.write_uint(match request.kind {
        QueryKind::Select => REQ_SELECT_JOBS,
        QueryKind::SelectStatus => REQ_SELECT_STATUS,
    });
    w.write_str(&request.requester.user);
    w.write_str(&request.requester.host);
    w.write_uint(u64::from(request.requester.permission.bits()));

    let entries: Vec<AttrEntry> = request.criteria.iter().map(criterion_entry).collect();
    encode_attr_list(&mut w, &entries);
    w.write_str(&extension(request));
    w.into_bytes()
}

pub fn decode_select_request(bytes: &[u8]) -> Result<SelectRequest> {
    let mut r = DisReader::new(bytes);
    let protocol = r.read_uint()?;
    let version = r.read_uint()?;
    if protocol != PROTOCOL_TYPE || version != PROTOCOL_VERSION {
        return Err(BatchError::InvalidRequest(format!(
            "unsupported protocol {}.{}",
            protocol, version
        )));
    }
    let kind = match r.read_uint()? {
        REQ_SELECT_JOBS => QueryKind::Select,
        REQ_SELECT_STATUS => QueryKind::SelectStatus,
        other => {
            return Err(BatchError::InvalidRequest(format!(
                "request type {} is not a select",
                other
            )))
        }
    };
    let user = r.read_str()?;
    let host = r.read_str()?;
    let bits = u32::try_from(r.read_uint()?)
        .map_err(|_| BatchError::InvalidRequest("permission out of range".to_string()))?;

    let criteria = decode_attr_list(&mut r)?
        .into_iter()
        .enumerate()
        .map(|(i, e)| entry_criterion(i + 1, e))
        .collect::<Result<Vec<_>>>()?;

    let extend = r.read_str()?;
    let flags: Vec<&str> = extend.split(',').map(str::trim).collect();

    Ok(SelectRequest {
        requester: Requester::new(user, host, Permission::from_bits(bits)),
        kind,
        criteria,
        exec_queue_only: flags.contains(&EXTEND_EXEC_QUEUE_ONLY),
        summarize_arrays: flags.contains(&EXTEND_SUMMARIZE_ARRAYS),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SelectRequest {
        SelectRequest::new(
            Requester::new("alice", "login1", Permission::USER),
            QueryKind::SelectStatus,
            vec![
                Criterion::new("job_state", Op::Eq, "QR"),
                Criterion::resource("Resource_List", "walltime", Op::Ge, "01:00:00"),
            ],
        )
        .exec_queue_only()
    }

    #[test]
    fn request_reads_back() {
        let req = request();
        let decoded = decode_select_request(&encode_select_request(&req)).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn criteria_carry_operator_codes() {
        let bytes = encode_select_request(&request());
        let mut r = DisReader::new(&bytes);
        for _ in 0..3 {
            r.read_uint().unwrap();
        }
        r.read_str().unwrap();
        r.read_str().unwrap();
        r.read_uint().unwrap();
        let entries = decode_attr_list(&mut r).unwrap();
        assert_eq!(entries[0].op, 4);
        assert_eq!(entries[1].op, 6);
        assert_eq!(entries[1].resource.as_deref(), Some("walltime"));
    }

    #[test]
    fn rejects_unknown_operator_with_index() {
        let mut w = DisWriter::new();
        w.write_uint(PROTOCOL_TYPE);
        w.write_uint(PROTOCOL_VERSION);
        w.write_uint(REQ_SELECT_JOBS);
        w.write_str("alice");
        w.write_str("h");
        w.write_uint(1);
        encode_attr_list(
            &mut w,
            &[
                AttrEntry {
                    op: Op::Gt.code(),
                    ..AttrEntry::new("Priority", "1")
                },
                AttrEntry {
                    op: 99,
                    ..AttrEntry::new("Priority", "2")
                },
            ],
        );
        w.write_str("");
        let err = decode_select_request(w.as_bytes()).unwrap_err();
        assert_eq!(err.criterion_index(), Some(2));
    }

    #[test]
    fn rejects_other_request_types() {
        let mut w = DisWriter::new();
        w.write_uint(PROTOCOL_TYPE);
        w.write_uint(PROTOCOL_VERSION);
        w.write_uint(19);
        let err = decode_select_request(w.as_bytes()).unwrap_err();
        assert!(matches!(err, BatchError::InvalidRequest(_)));
    }
}
