pub use hci::Opcode;

macro_rules! opcodes {
    (
        $(
            $_ogf_comment:ident = $ogf:expr;
            {
                $(pub const $var:ident = $ocf:expr;)+
            }
        )+
    ) => {
        $($(
            pub const $var: Opcode = Opcode::new($ogf, $ocf);
        )+)+
    }
}

opcodes! {
    LinkControl = 0x01;
    {
        pub const DISCONNECT = 0x0006;
    }
    HostControl = 0x03;
    {
        pub const SET_EVENT_MASK = 0x0001;
        pub const RESET = 0x0003;
        pub const READ_LE_HOST_SUPPORTED = 0x006C;
        pub const WRITE_LE_HOST_SUPPORTED = 0x006D;
    }
    InfoParam = 0x04;
    {
        pub const READ_LOCAL_VERSION = 0x0001;
        pub const READ_SUPPORTED_COMMANDS = 0x0002;
        pub const READ_BUFFER_SIZE = 0x0005;
        pub const READ_BD_ADDR = 0x0009;
    }
    StatusParam = 0x05;
    {
        pub const READ_RSSI = 0x0005;
    }
    LeControl = 0x08;
    {
        pub const LE_SET_EVENT_MASK = 0x0001;
        pub const LE_READ_BUFFER_SIZE = 0x0002;
        pub const LE_SET_RANDOM_ADDRESS = 0x0005;
        pub const LE_SET_SCAN_PARAMETERS = 0x000B;
        pub const LE_SET_SCAN_ENABLE = 0x000C;
        pub const LE_CREATE_CONNECTION = 0x000D;
        pub const LE_CREATE_CONNECTION_CANCEL = 0x000E;
        pub const LE_CONNECTION_UPDATE = 0x0013;
        pub const LE_START_ENCRYPTION = 0x0019;
        pub const LE_SET_DEFAULT_PHY = 0x0031;
        pub const LE_SET_EXTENDED_SCAN_PARAMETERS = 0x0041;
        pub const LE_SET_EXTENDED_SCAN_ENABLE = 0x0042;
        pub const LE_EXTENDED_CREATE_CONNECTION = 0x0043;
    }
}
