use crate::error::BatchError;
use crate::scheduler::JobId;
use crate::select::{Reply, StatusRecord};
use crate::wire::attropl::{decode_attr_list, encode_attr_list};
use crate::wire::dis::{DisError, DisReader, DisWriter};

pub const CHOICE_NULL: u64 = 1;
pub const CHOICE_SELECT: u64 = 5;
pub const CHOICE_STATUS: u64 = 6;

/// Object type tag for job status records.
pub const OBJ_JOB: u64 = 2;

/// A decoded batch reply: return code, auxiliary code and, on success, the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFrame {
    pub code: u32,
    pub auxcode: u32,
    pub body: Option<Reply>,
}

/// Encode a successful select or select-status reply.
pub fn encode_reply(reply: &Reply) -> Vec<u8> {
    let mut w = DisWriter::new();
    w.write_uint(0);
    w.write_uint(0);
    match reply {
        Reply::SelectedIds(ids) => {
            w.write_uint(CHOICE_SELECT);
            w.write_uint(ids.len() as u64);
            for id in ids {
                w.write_str(id.as_str());
            }
        }
        Reply::StatusRecords(records) => {
            w.write_uint(CHOICE_STATUS);
            w.write_uint(records.len() as u64);
            for record in records {
                w.write_uint(OBJ_JOB);
                w.write_str(record.job_id.as_str());
                encode_attr_list(&mut w, &record.attributes);
            }
        }
    }
    w.into_bytes()
}

/// Encode a rejection. The auxiliary code carries the offending criterion's
/// position when there is one.
pub fn encode_error(err: &BatchError) -> Vec<u8> {
    let mut w = DisWriter::new();
    w.write_uint(u64::from(err.code()));
    w.write_uint(err.criterion_index().unwrap_or(0) as u64);
    w.write_uint(CHOICE_NULL);
    w.into_bytes()
}

fn read_u32(r: &mut DisReader<'_>) -> Result<u32, DisError> {
    u32::try_from(r.read_uint()?).map_err(|_| DisError::Overflow)
}

pub fn decode_reply(bytes: &[u8]) -> Result<ReplyFrame, DisError> {
    let mut r = DisReader::new(bytes);
    let code = read_u32(&mut r)?;
    let auxcode = read_u32(&mut r)?;
    let body = match r.read_uint()? {
        CHOICE_NULL => None,
        CHOICE_SELECT => {
            let count = r.read_uint()?;
            let ids = (0..count)
                .map(|_| r.read_str().map(JobId::from))
                .collect::<Result<Vec<_>, _>>()?;
            Some(Reply::SelectedIds(ids))
        }
        CHOICE_STATUS => {
            let count = r.read_uint()?;
            let mut records = Vec::new();
            for _ in 0..count {
                let _objtype = r.read_uint()?;
                let job_id = JobId::from(r.read_str()?);
                let attributes = decode_attr_list(&mut r)?;
                records.push(StatusRecord { job_id, attributes });
            }
            Some(Reply::StatusRecords(records))
        }
        other => return Err(DisError::UnknownChoice(other)),
    };
    Ok(ReplyFrame {
        code,
        auxcode,
        body,
    })
}
