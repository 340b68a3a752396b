//! Display names for AMD PSP and BIOS directory entry types.

/// Directory entry type pointing at a level 2 PSP directory.
pub const PSP_L2_DIRECTORY: u8 = 0x40;

/// Directory entry type pointing at a level 2 BIOS directory.
pub const BIOS_L2_DIRECTORY: u8 = 0x70;

/// Name of a `$PSP`/`$PL2` directory entry type, or its hex value.
pub fn psp_entry_name(kind: u8) -> String {
    let name = match kind {
        0x00 => "AMD_PUBLIC_KEY",
        0x01 => "PSP_FW_BOOT_LOADER",
        0x02 => "PSP_FW_TRUSTED_OS",
        0x03 => "PSP_FW_RECOVERY_BOOT_LOADER",
        0x04 => "PSP_NV_DATA",
        0x05 => "BIOS_PUBLIC_KEY",
        0x06 => "BIOS_RTM_FIRMWARE",
        0x07 => "BIOS_RTM_SIGNATURE",
        0x08 => "SMU_OFFCHIP_FW",
        0x09 => "SEC_DBG_PUBLIC_KEY",
        0x0A => "OEM_PSP_FW_PUBLIC_KEY",
        0x0B => "AMD_SOFT_FUSE_CHAIN_01",
        0x0C => "PSP_BOOT_TIME_TRUSTLETS",
        0x0D => "PSP_BOOT_TIME_TRUSTLETS_KEY",
        0x10 => "PSP_AGESA_RESUME_FW",
        0x12 => "SMU_OFF_CHIP_FW_2",
        0x13 => "DEBUG_UNLOCK",
        0x1A => "PSP_S3_NV_DATA",
        0x21 => "WRAPPED_IKEK",
        0x22 => "TOKEN_UNLOCK",
        0x24 => "SEC_GASKET",
        0x25 => "MP2_FW",
        0x28 => "DRIVER_ENTRIES",
        0x2D => "S0I3_DRIVER",
        0x30 => "ABL0",
        0x31 => "ABL1",
        0x32 => "ABL2",
        0x33 => "ABL3",
        0x34 => "ABL4",
        0x35 => "ABL5",
        0x36 => "ABL6",
        0x37 => "ABL7",
        0x38 => "SEV_DATA",
        0x39 => "SEV_CODE",
        PSP_L2_DIRECTORY => "PSP_L2_DIRECTORY",
        0x42 => "DXIO_PHY_SRAM_FW",
        0x45 => "TOS_SEC_POLICY",
        0x48 => "PSP_BACKUP_A",
        0x49 => "BIOS_L2_PTR",
        0x4A => "PSP_BACKUP_B",
        0x4C => "SECURE_EXTENSION_FW",
        0x50 => "KEY_DATABASE",
        0x51 => "KEY_DATABASE_SIGNATURE",
        _ => return hex_name(kind),
    };
    name.to_string()
}

/// Name of a `$BHD`/`$BL2` directory entry type, or its hex value.
pub fn bios_entry_name(kind: u8) -> String {
    let name = match kind {
        0x05 => "BIOS_PUBLIC_KEY",
        0x07 => "BIOS_RTM_SIGNATURE",
        0x60 => "APCB",
        0x61 => "APOB",
        0x62 => "BIOS_BINARY",
        0x63 => "APOB_NV",
        0x64 => "PMU_INSTRUCTION",
        0x65 => "PMU_DATA",
        0x66 => "MICROCODE",
        0x67 => "CORE_MCE_DATA",
        0x68 => "APCB_BACKUP",
        0x69 => "EARLY_VGA_IMAGE",
        0x6A => "MP2_FW_CONFIG",
        BIOS_L2_DIRECTORY => "BIOS_L2_DIRECTORY",
        _ => return hex_name(kind),
    };
    name.to_string()
}

fn hex_name(kind: u8) -> String {
    format!("0x{kind:02x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_and_unknown_types() {
        assert_eq!(psp_entry_name(0x01), "PSP_FW_BOOT_LOADER");
        assert_eq!(bios_entry_name(0x62), "BIOS_BINARY");
        assert_eq!(psp_entry_name(0xEE), "0xee");
        assert_eq!(bios_entry_name(0x01), "0x01");
    }
}
