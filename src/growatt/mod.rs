// Growatt MQTT wire protocol
pub mod command;       // Frames the bridge sends to devices
pub mod device_config; // TLV self-description blocks
pub mod frame;         // Scramble layer and CRC trailer
pub mod message;       // Uplink frame classifier
pub mod modbus;        // Register report codec
pub mod registers;     // Register descriptors and decoding
