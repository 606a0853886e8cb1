use bmprov_schemas::inventory::VswitchType;
use crate::topology::{Segmentation, TopologyError};

/// Linux bonding driver mode names and their numeric codes
pub const LINUX_BOND_MODES: [(&str, u8); 7] = [
    ("balance-rr", 0),
    ("active-backup", 1),
    ("balance-xor", 2),
    ("broadcast", 3),
    ("802.3ad", 4),
    ("balance-tlb", 5),
    ("balance-alb", 6),
];

pub fn linux_bond_mode_code(mode: &str) -> Option<u8> {
    LINUX_BOND_MODES.iter()
        .find(|(name, _)| *name == mode)
        .map(|(_, code)| *code)
}

/// A bond mode after validation against the vswitch and segmentation it carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BondMode {
    /// numeric linux bonding code, `0` to `4`
    Code(u8),
    /// vswitch bond with its lacp setting, i.e. `balance-tcp;active`
    Vswitch {
        mode: String,
        lacp: String,
    },
}

/// Validate a bond mode for a vswitch on a vlan or vxlan segmented network. Numeric codes `0`-`4`
/// are always accepted, otherwise the mode must be `<mode>;<lacp>` and the pair must be supported
/// by the vswitch.
pub fn resolve_bond_mode(
    segmentation: Segmentation,
    vswitch: VswitchType,
    mode: &str,
) -> Result<BondMode, TopologyError> {
    let invalid = || TopologyError::InvalidBondMode {
        mode: mode.to_string(),
        vswitch: vswitch.to_string(),
        segmentation: segmentation.to_string(),
    };
    if let Ok(code) = mode.parse::<u8>() {
        if code <= 4 {
            return Ok(BondMode::Code(code));
        }
        return Err(invalid());
    }
    let parts: Vec<&str> = mode.split(';').collect();
    let [bond, lacp] = parts.as_slice() else {
        return Err(invalid());
    };
    let accepted = match (segmentation, vswitch) {
        (Segmentation::Vxlan, VswitchType::Dvs) => {
            matches!(*bond, "active-backup" | "balance-slb") && *lacp == "off"
        }
        (Segmentation::Vlan, _) => match *bond {
            "balance-tcp" => matches!(*lacp, "active" | "passive" | "off"),
            "active-backup" | "balance-slb" => *lacp == "off",
            _ => false,
        },
        // ovs on vxlan takes the vswitch's own bonding as is
        (Segmentation::Vxlan, VswitchType::Ovs) => true,
    };
    if !accepted {
        return Err(invalid());
    }
    Ok(BondMode::Vswitch { mode: bond.to_string(), lacp: lacp.to_string() })
}

/// Mode template used for a numeric code when describing a bond to the vswitch, falls back to
/// `active-backup` for codes the segmentation has no template for
fn mode_template(segmentation: Segmentation, code: u8) -> (&'static str, &'static str) {
    match (segmentation, code) {
        (_, 1) => ("balance-slb", "off"),
        (Segmentation::Vlan, 2) => ("balance-tcp", "active"),
        _ => ("active-backup", "off"),
    }
}

impl BondMode {
    /// Render a bond for the vswitch config, `bond1(active-backup;off;eth0-eth1)`
    pub fn describe(
        &self,
        segmentation: Segmentation,
        name: &str,
        slave1: &str,
        slave2: &str,
    ) -> String {
        let (mode, lacp) = match self {
            BondMode::Code(code) => mode_template(segmentation, *code),
            BondMode::Vswitch { mode, lacp } => (mode.as_str(), lacp.as_str()),
        };
        format!("{name}({mode};{lacp};{slave1}-{slave2})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_bond_codes() {
        assert_eq!(linux_bond_mode_code("balance-rr"), Some(0));
        assert_eq!(linux_bond_mode_code("802.3ad"), Some(4));
        assert_eq!(linux_bond_mode_code("balance-alb"), Some(6));
        assert_eq!(linux_bond_mode_code("balance-tcp"), None);
    }

    #[test]
    fn test_resolve_bond_mode() {
        let err = resolve_bond_mode(Segmentation::Vxlan, VswitchType::Dvs, "balance-tcp;active").unwrap_err();
        assert_eq!(err.to_string(), "Invalid bond_mode(balance-tcp;active) for dvs in vxlan network");
        assert_eq!(
            resolve_bond_mode(Segmentation::Vlan, VswitchType::Ovs, "balance-tcp;active").unwrap(),
            BondMode::Vswitch { mode: "balance-tcp".into(), lacp: "active".into() }
        );
        assert!(resolve_bond_mode(Segmentation::Vxlan, VswitchType::Dvs, "active-backup;off").is_ok());
        assert!(resolve_bond_mode(Segmentation::Vxlan, VswitchType::Dvs, "balance-slb;active").is_err());
        assert!(resolve_bond_mode(Segmentation::Vlan, VswitchType::Dvs, "balance-tcp;passive").is_ok());
        assert!(resolve_bond_mode(Segmentation::Vlan, VswitchType::Dvs, "balance-tcp;fast").is_err());
        assert!(resolve_bond_mode(Segmentation::Vlan, VswitchType::Ovs, "balance-xor;off").is_err());
        assert_eq!(resolve_bond_mode(Segmentation::Vxlan, VswitchType::Dvs, "1").unwrap(), BondMode::Code(1));
        assert!(resolve_bond_mode(Segmentation::Vlan, VswitchType::Ovs, "6").is_err());
        assert!(resolve_bond_mode(Segmentation::Vlan, VswitchType::Ovs, "balance-tcp").is_err());
    }

    #[test]
    fn test_describe_bond() {
        let code = BondMode::Code(2);
        assert_eq!(code.describe(Segmentation::Vlan, "bond1", "eth0", "eth1"), "bond1(balance-tcp;active;eth0-eth1)");
        // vxlan has no template for code 2
        assert_eq!(code.describe(Segmentation::Vxlan, "bond1", "eth0", "eth1"), "bond1(active-backup;off;eth0-eth1)");
        let vswitch = BondMode::Vswitch { mode: "balance-slb".into(), lacp: "off".into() };
        assert_eq!(vswitch.describe(Segmentation::Vxlan, "bond0", "eth2", "eth3"), "bond0(balance-slb;off;eth2-eth3)");
    }
}
