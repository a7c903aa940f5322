//! Attribute protocol opcodes, error codes and request builders.
//!
//! All multi-byte fields are little-endian. Builders return complete PDUs ready to be written on
//! the [ATT channel](ATT_CID).

use byteorder::{ByteOrder, LittleEndian};

/// L2CAP fixed channel of the attribute protocol.
pub const ATT_CID: u16 = 0x0004;

/// Error Response
pub const OP_ERROR: u8 = 0x01;
/// Exchange MTU Request
pub const OP_MTU_REQ: u8 = 0x02;
/// Exchange MTU Response
pub const OP_MTU_RESP: u8 = 0x03;
/// Find Information Request
pub const OP_FIND_INFO_REQ: u8 = 0x04;
/// Find Information Response
pub const OP_FIND_INFO_RESP: u8 = 0x05;
/// Read By Type Request
pub const OP_READ_BY_TYPE_REQ: u8 = 0x08;
/// Read By Type Response
pub const OP_READ_BY_TYPE_RESP: u8 = 0x09;
/// Read Request
pub const OP_READ_REQ: u8 = 0x0A;
/// Read Response
pub const OP_READ_RESP: u8 = 0x0B;
/// Read Blob Request
pub const OP_READ_BLOB_REQ: u8 = 0x0C;
/// Read Blob Response
pub const OP_READ_BLOB_RESP: u8 = 0x0D;
/// Read By Group Type Request
pub const OP_READ_BY_GROUP_REQ: u8 = 0x10;
/// Read By Group Type Response
pub const OP_READ_BY_GROUP_RESP: u8 = 0x11;
/// Write Request
pub const OP_WRITE_REQ: u8 = 0x12;
/// Write Response
pub const OP_WRITE_RESP: u8 = 0x13;
/// Prepare Write Request
pub const OP_PREPARE_WRITE_REQ: u8 = 0x16;
/// Prepare Write Response
pub const OP_PREPARE_WRITE_RESP: u8 = 0x17;
/// Execute Write Request
pub const OP_EXECUTE_WRITE_REQ: u8 = 0x18;
/// Execute Write Response
pub const OP_EXECUTE_WRITE_RESP: u8 = 0x19;
/// Handle Value Notification
pub const OP_HANDLE_NOTIFY: u8 = 0x1B;
/// Handle Value Indication
pub const OP_HANDLE_IND: u8 = 0x1D;
/// Handle Value Confirmation
pub const OP_HANDLE_CNF: u8 = 0x1E;
/// Write Command
pub const OP_WRITE_CMD: u8 = 0x52;
/// Signed Write Command
pub const OP_SIGNED_WRITE_CMD: u8 = 0xD2;

/// Opcode bit marking a command, which is never answered.
pub const COMMAND_FLAG: u8 = 0x40;

/// The attribute handle is invalid.
pub const ECODE_INVALID_HANDLE: u8 = 0x01;
/// The attribute cannot be read.
pub const ECODE_READ_NOT_PERM: u8 = 0x02;
/// The attribute cannot be written.
pub const ECODE_WRITE_NOT_PERM: u8 = 0x03;
/// The PDU was malformed.
pub const ECODE_INVALID_PDU: u8 = 0x04;
/// The link must be authenticated first.
pub const ECODE_AUTHENTICATION: u8 = 0x05;
/// The server does not support the request.
pub const ECODE_REQ_NOT_SUPP: u8 = 0x06;
/// The offset is past the end of the attribute.
pub const ECODE_INVALID_OFFSET: u8 = 0x07;
/// The client must be authorized first.
pub const ECODE_AUTHORIZATION: u8 = 0x08;
/// Too many prepared writes.
pub const ECODE_PREP_QUEUE_FULL: u8 = 0x09;
/// No attribute in the requested range.
pub const ECODE_ATTR_NOT_FOUND: u8 = 0x0A;
/// The attribute cannot be read with Read Blob.
pub const ECODE_ATTR_NOT_LONG: u8 = 0x0B;
/// The encryption key is too short.
pub const ECODE_INSUFF_ENC_KEY_SIZE: u8 = 0x0C;
/// The value has the wrong length.
pub const ECODE_INVALID_ATTR_VALUE_LEN: u8 = 0x0D;
/// The request failed for an unlikely reason.
pub const ECODE_UNLIKELY: u8 = 0x0E;
/// The link must be encrypted first.
pub const ECODE_INSUFF_ENC: u8 = 0x0F;
/// The grouping attribute type is not supported.
pub const ECODE_UNSUPP_GRP_TYPE: u8 = 0x10;
/// The server ran out of resources.
pub const ECODE_INSUFF_RESOURCES: u8 = 0x11;

/// Primary Service declaration.
pub const PRIMARY_SERVICE_UUID: u16 = 0x2800;
/// Include declaration.
pub const INCLUDE_UUID: u16 = 0x2802;
/// Characteristic declaration.
pub const CHARACTERISTIC_UUID: u16 = 0x2803;
/// Client Characteristic Configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: u16 = 0x2902;
/// Server Characteristic Configuration descriptor.
pub const SERVER_CHARACTERISTIC_CONFIG_UUID: u16 = 0x2903;

/// Error Response to a request from the peer.
pub fn error_response(opcode: u8, handle: u16, status: u8) -> Vec<u8> {
    let mut buf = vec![OP_ERROR, opcode, 0, 0, status];
    LittleEndian::write_u16(&mut buf[2..4], handle);
    buf
}

/// Exchange MTU Request.
pub fn mtu_request(mtu: u16) -> Vec<u8> {
    let mut buf = vec![OP_MTU_REQ, 0, 0];
    LittleEndian::write_u16(&mut buf[1..3], mtu);
    buf
}

fn range_request(opcode: u8, start_handle: u16, end_handle: u16, extra: usize) -> Vec<u8> {
    let mut buf = vec![0; 5 + extra];
    buf[0] = opcode;
    LittleEndian::write_u16(&mut buf[1..3], start_handle);
    LittleEndian::write_u16(&mut buf[3..5], end_handle);
    buf
}

/// Read By Group Type Request for a 16-bit group type.
pub fn read_by_group_request(start_handle: u16, end_handle: u16, group_uuid: u16) -> Vec<u8> {
    let mut buf = range_request(OP_READ_BY_GROUP_REQ, start_handle, end_handle, 2);
    LittleEndian::write_u16(&mut buf[5..7], group_uuid);
    buf
}

/// Read By Type Request for a 16-bit attribute type.
pub fn read_by_type_request(start_handle: u16, end_handle: u16, type_uuid: u16) -> Vec<u8> {
    let mut buf = range_request(OP_READ_BY_TYPE_REQ, start_handle, end_handle, 2);
    LittleEndian::write_u16(&mut buf[5..7], type_uuid);
    buf
}

/// Read Request.
pub fn read_request(handle: u16) -> Vec<u8> {
    let mut buf = vec![OP_READ_REQ, 0, 0];
    LittleEndian::write_u16(&mut buf[1..3], handle);
    buf
}

/// Read Blob Request, continuing a read at `offset`.
pub fn read_blob_request(handle: u16, offset: u16) -> Vec<u8> {
    let mut buf = vec![OP_READ_BLOB_REQ, 0, 0, 0, 0];
    LittleEndian::write_u16(&mut buf[1..3], handle);
    LittleEndian::write_u16(&mut buf[3..5], offset);
    buf
}

/// Find Information Request.
pub fn find_info_request(start_handle: u16, end_handle: u16) -> Vec<u8> {
    range_request(OP_FIND_INFO_REQ, start_handle, end_handle, 0)
}

/// Write Request, or Write Command when no response is wanted.
pub fn write_request(handle: u16, data: &[u8], without_response: bool) -> Vec<u8> {
    let mut buf = vec![0; 3 + data.len()];
    buf[0] = if without_response {
        OP_WRITE_CMD
    } else {
        OP_WRITE_REQ
    };
    LittleEndian::write_u16(&mut buf[1..3], handle);
    buf[3..].copy_from_slice(data);
    buf
}

/// Prepare Write Request for one chunk of a long write.
pub fn prepare_write_request(handle: u16, offset: u16, data: &[u8]) -> Vec<u8> {
    let mut buf = vec![0; 5 + data.len()];
    buf[0] = OP_PREPARE_WRITE_REQ;
    LittleEndian::write_u16(&mut buf[1..3], handle);
    LittleEndian::write_u16(&mut buf[3..5], offset);
    buf[5..].copy_from_slice(data);
    buf
}

/// Execute Write Request. Commits the prepared writes unless `cancel_prepared_writes`.
pub fn execute_write_request(cancel_prepared_writes: bool) -> Vec<u8> {
    vec![
        OP_EXECUTE_WRITE_REQ,
        if cancel_prepared_writes { 0x00 } else { 0x01 },
    ]
}

/// Handle Value Confirmation.
pub fn handle_confirmation() -> Vec<u8> {
    vec![OP_HANDLE_CNF]
}
