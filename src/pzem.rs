// pzem.rs: PZEM-004T v3 request/response frames

use crc::{Crc, CRC_16_MODBUS};

use crate::*;

/// General slave address answered by any single PZEM on the bus.
pub const PZEM_ADDR: u8 = 0xF8;

pub const FN_READ_INPUT: u8 = 0x04;
pub const FN_RESET_ENERGY: u8 = 0x42;

/// First measurement register and register count of the poll request.
pub const READING_REGISTER: u16 = 0x0000;
pub const READING_REGISTER_COUNT: u16 = 0x000A;

pub const REQUEST_LEN: usize = 8;
pub const RESPONSE_LEN: usize = 25;
pub const RESET_LEN: usize = 4;

// CRC-16 with reflected poly 0xA001 and seed 0xFFFF, no final xor
const PZEM_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

pub fn crc16(data: &[u8]) -> u16 {
    PZEM_CRC.checksum(data)
}

/// Write the checksum of all but the last two bytes into the last two,
/// low byte first.
pub fn seal(frame: &mut [u8]) {
    let n = frame.len() - 2;
    let crc = crc16(&frame[..n]);
    frame[n..].copy_from_slice(&crc.to_le_bytes());
}

/// Check the trailing little-endian checksum of a complete frame.
pub fn verify(frame: &[u8]) -> Result<(), ProtocolError> {
    if frame.len() < 2 {
        return Err(ProtocolError::FrameTimeout {
            got: frame.len(),
            want: 2,
        });
    }
    let n = frame.len() - 2;
    let read = u16::from_le_bytes([frame[n], frame[n + 1]]);
    let calc = crc16(&frame[..n]);
    if read != calc {
        return Err(ProtocolError::Checksum { read, calc });
    }
    Ok(())
}

pub fn read_request(addr: u8, register: u16, count: u16) -> [u8; REQUEST_LEN] {
    let [reg_hi, reg_lo] = register.to_be_bytes();
    let [cnt_hi, cnt_lo] = count.to_be_bytes();
    let mut frame = [addr, FN_READ_INPUT, reg_hi, reg_lo, cnt_hi, cnt_lo, 0, 0];
    seal(&mut frame);
    frame
}

/// The energy query sent once per poll cycle.
pub fn poll_request() -> [u8; REQUEST_LEN] {
    read_request(PZEM_ADDR, READING_REGISTER, READING_REGISTER_COUNT)
}

pub fn reset_energy_request(addr: u8) -> [u8; RESET_LEN] {
    let mut frame = [addr, FN_RESET_ENERGY, 0, 0];
    seal(&mut frame);
    frame
}

// 32-bit registers come as two big-endian words, low word first
fn word32(b: &[u8]) -> u32 {
    (b[0] as u32) << 8 | b[1] as u32 | (b[2] as u32) << 24 | (b[3] as u32) << 16
}

fn word16(b: &[u8]) -> u32 {
    (b[0] as u32) << 8 | b[1] as u32
}

fn put_word32(b: &mut [u8], v: u32) {
    b[0] = (v >> 8) as u8;
    b[1] = v as u8;
    b[2] = (v >> 24) as u8;
    b[3] = (v >> 16) as u8;
}

/// Decode a complete poll response.
/// Offsets from the start of the frame:
///   [0..3]   = address, function, byte count (20)
///   [3..5]   = voltage, 0.1 V
///   [5..9]   = current, 0.001 A
///   [9..13]  = power, 0.1 W
///   [13..17] = energy, 1 Wh
///   [17..19] = frequency, 0.1 Hz
///   [19..21] = power factor, 0.01
///   [21..23] = alarm status
///   [23..25] = CRC
pub fn decode_reading(frame: &[u8; RESPONSE_LEN]) -> Result<Reading, ProtocolError> {
    verify(frame)?;

    let alarm = word16(&frame[21..23]);
    if alarm != 0 {
        debug!("PZEM: power alarm flag set ({alarm:04X})");
    }

    Ok(Reading {
        voltage_deci: word16(&frame[3..5]),
        current_milli: word32(&frame[5..9]),
        power_deci: word32(&frame[9..13]),
        energy_wh: word32(&frame[13..17]),
        frequency_deci: word16(&frame[17..19]),
        power_factor_centi: word16(&frame[19..21]),
        voltage_min: 0,
        voltage_max: 0,
    })
}

/// Build the response a PZEM would send for `reading`.
pub fn encode_response(reading: &Reading, alarm: u16) -> [u8; RESPONSE_LEN] {
    let mut frame = [0u8; RESPONSE_LEN];
    frame[0] = PZEM_ADDR;
    frame[1] = FN_READ_INPUT;
    frame[2] = (READING_REGISTER_COUNT * 2) as u8;
    frame[3..5].copy_from_slice(&(reading.voltage_deci as u16).to_be_bytes());
    put_word32(&mut frame[5..9], reading.current_milli);
    put_word32(&mut frame[9..13], reading.power_deci);
    put_word32(&mut frame[13..17], reading.energy_wh);
    frame[17..19].copy_from_slice(&(reading.frequency_deci as u16).to_be_bytes());
    frame[19..21].copy_from_slice(&(reading.power_factor_centi as u16).to_be_bytes());
    frame[21..23].copy_from_slice(&alarm.to_be_bytes());
    seal(&mut frame);
    frame
}

// EOF
